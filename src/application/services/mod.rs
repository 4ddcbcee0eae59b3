pub mod aggregate;
pub mod bootstrap;
pub mod ingest;
pub mod refresh;

pub use aggregate::{AggregateOutcome, AggregateService};
pub use bootstrap::{BootstrapOutcome, BootstrapService};
pub use ingest::{IngestOutcome, IngestService};
pub use refresh::{RefreshOutcome, RefreshService};
