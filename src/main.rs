use anyhow::Result;
use chowrank::application::config::{AppConfig, Secrets};
use chowrank::application::{ServerConfig, serve};
use chowrank::cli::{Cli, Commands};
use chowrank::worker;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    if let Err(err) = init_tracing() {
        eprintln!("failed to initialize tracing: {err}");
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(cmd) => {
            let secrets = Secrets::for_server()?;
            let config = AppConfig::load_or_default(&cmd.config)?;
            serve(ServerConfig {
                bind_address: cmd.bind_address,
                database_url: secrets.database_url,
                config,
            })
            .await
        }
        Commands::Work(cmd) => {
            let secrets = Secrets::for_worker()?;
            let config = AppConfig::load_or_default(&cmd.config)?;
            worker::run(
                worker::WorkerConfig {
                    database_url: secrets.database_url.clone(),
                    config,
                },
                &secrets,
            )
            .await
        }
        Commands::Bootstrap(cmd) => enqueue_bootstrap(cmd).await,
    }
}

async fn enqueue_bootstrap(cmd: chowrank::cli::BootstrapCommand) -> Result<()> {
    use chowrank::domain::jobs::{JobType, NewJob};
    use chowrank::domain::repositories::JobRepository;
    use chowrank::infrastructure::database::Database;
    use chowrank::infrastructure::repositories::jobs::SqlJobRepository;

    let secrets = Secrets::for_server()?;
    let database = Database::connect(&secrets.database_url).await?;
    let job_repo = SqlJobRepository::new(database.clone_pool());

    let job = job_repo
        .enqueue(NewJob::new(
            JobType::BootstrapCity,
            serde_json::json!({ "city_query": cmd.city }),
        ))
        .await?;

    chowrank::cli::print_json(&job)
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize tracing: {err}"))
}
