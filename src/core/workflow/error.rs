use super::machine::TransitionError;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("workflow {workflow_id} kept changing underneath us ({attempts} attempts)")]
    Conflict { workflow_id: String, attempts: usize },
    #[error("store failure: {0:#}")]
    Store(anyhow::Error),
    #[error("remote failure: {0:#}")]
    Remote(anyhow::Error),
}

impl From<TransitionError> for WorkflowError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Invalid(msg) => WorkflowError::Validation(msg),
        }
    }
}
