use uuid::Uuid;

use crate::models::{CycleStatus, UnknownVariant};

/// Why a reporting cycle cannot be aggregated.
#[derive(Debug, thiserror::Error)]
pub enum CycleConfigError {
    #[error("reporting cycle {0} not found")]
    NotFound(Uuid),
    #[error("reporting cycle {cycle} is missing required field '{field}'")]
    MissingField { cycle: Uuid, field: &'static str },
    #[error("reporting cycle {cycle} has status '{status}', which does not permit calculation")]
    StatusNotEligible { cycle: Uuid, status: CycleStatus },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("column '{column}' could not be decoded: {source}")]
    Decode {
        column: &'static str,
        source: UnknownVariant,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] CycleConfigError),
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
}
