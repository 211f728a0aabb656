use std::error::Error as StdError;

/// Errors a mutation can report back to the committer.
///
/// A failed mutation is rolled back and logged; it never reaches the caller
/// of `commit`.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("state slice `{0}` is missing")]
    MissingSlice(String),
    #[error("{0}")]
    Rejected(String),
}

impl MutationError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Errors surfaced through an action's own result.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("collaborator failed: {0}")]
    Collaborator(#[source] Box<dyn StdError + Send + Sync>),
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    /// Wrap an error returned by an external collaborator (upload, network).
    pub fn collaborator(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::Collaborator(Box::new(err))
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}
