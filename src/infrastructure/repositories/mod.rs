pub mod aggregations;
pub mod cities;
pub mod jobs;
pub mod mentions;
pub mod places;
pub mod projections;
pub mod sources;

use crate::domain::RepositoryError;

pub(crate) fn unexpected(err: sqlx::Error) -> RepositoryError {
    RepositoryError::unexpected(err.to_string())
}
