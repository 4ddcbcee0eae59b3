use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::application::errors::AppResult;
use crate::domain::projections::{PROJECTION_VIEWS, ProjectionVersion};
use crate::domain::repositories::ProjectionRepository;

#[derive(Debug, Serialize)]
pub struct RefreshOutcome {
    pub versions: Vec<ProjectionVersion>,
}

/// Refreshes every ranked projection concurrently and stamps a fresh version
/// afterwards, so conditional readers pick up the new contents.
pub struct RefreshService {
    projection_repo: Arc<dyn ProjectionRepository>,
}

impl RefreshService {
    pub fn new(projection_repo: Arc<dyn ProjectionRepository>) -> Self {
        Self { projection_repo }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> AppResult<RefreshOutcome> {
        let mut versions = Vec::with_capacity(PROJECTION_VIEWS.len());

        for view in PROJECTION_VIEWS {
            self.projection_repo.refresh(view).await?;
            // Version bumps strictly after the refresh succeeds
            let hash = format!("v{}", Utc::now().timestamp_millis());
            let version = self.projection_repo.bump_version(view, &hash).await?;
            info!(
                view,
                version = %version.version_hash,
                rows = version.row_count,
                "projection refreshed"
            );
            versions.push(version);
        }

        Ok(RefreshOutcome { versions })
    }
}
