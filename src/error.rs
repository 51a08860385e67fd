//! Error taxonomy shared by the layout resolver, planner and frame loop.

use thiserror::Error;

pub type BindingResult<T> = Result<T, BindingError>;

#[derive(Debug, Error)]
pub enum BindingError {
    /// Raised at registration/init time. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A struct was referenced but never declared, or struct definitions form a cycle.
    #[error("type not defined: {0}")]
    TypeNotDefined(String),

    /// A bind group was requested before an async resource finished loading.
    #[error("resource not ready: {0}")]
    ResourceNotReady(String),

    #[error("no compatible GPU backend: {0}")]
    BackendUnavailable(String),

    /// Shader text, layout entries and bind-group entries disagree on binding indices.
    #[error("binding plan inconsistency: {0}")]
    PlanInconsistency(String),

    /// Terminal for the session; the frame loop refuses to run afterwards.
    #[error("device lost: {0}")]
    DeviceLost(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl BindingError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        BindingError::Configuration(msg.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BindingError::DeviceLost(_) | BindingError::PlanInconsistency(_)
        )
    }
}
