//! Write path for classifications, commissions and the classification catalog.

mod catalog;
mod classification;
mod commission;
pub mod memory;
pub mod repository;

pub use catalog::CatalogStore;
pub use classification::{ClassificationDraft, EntityClassificationStore, UpsertOutcome};
pub use commission::CommissionStore;
pub use repository::{
    CatalogRepository, ClassificationRepository, ClassificationTx, CommissionRepository,
    CommissionTx, RepositoryError,
};

/// Errors raised by the stores on top of plain repository failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{what} {id} is still referenced by {references} record(s)")]
    InUse {
        what: &'static str,
        id: u64,
        references: usize,
    },
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },
    #[error("{what} with code {code} already exists")]
    DuplicateCode { what: &'static str, code: String },
    #[error("classification {code} is not applicable to {kind}")]
    NotApplicable { code: String, kind: &'static str },
    #[error("invalid commission relation: {0}")]
    InvalidRelation(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl StoreError {
    pub(crate) fn not_found(what: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            what,
            id: id.to_string(),
        }
    }
}
