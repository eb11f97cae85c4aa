//! Error types for context acquisition and rendering.

use thiserror::Error;

/// How a failure is treated by the recovery layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No context obtainable, or denylisted hardware. Permanent for the session.
    UnsupportedPlatform,
    /// Context lost mid-session; retried with bounded attempts.
    TransientContextLoss,
    /// Exception during surface setup; routed through the same path as a loss.
    SetupFailure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GlError {
    #[error("WebGL not supported")]
    Unavailable,

    #[error("context acquisition failed: {0}")]
    Acquire(String),

    #[error("renderer `{renderer}` is denylisted")]
    Denylisted { renderer: String },

    #[error("WebGL context lost")]
    ContextLost,

    #[error("context query failed: {0}")]
    Query(String),

    #[error("scene setup failed: {0}")]
    Setup(String),

    #[error("draw failed: {0}")]
    Draw(String),
}

impl GlError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GlError::Unavailable | GlError::Denylisted { .. } => FailureKind::UnsupportedPlatform,
            GlError::ContextLost | GlError::Draw(_) => FailureKind::TransientContextLoss,
            GlError::Acquire(_) | GlError::Query(_) | GlError::Setup(_) => FailureKind::SetupFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, GlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_are_routed_like_losses() {
        assert_eq!(GlError::Setup("shader".into()).kind(), FailureKind::SetupFailure);
        assert_eq!(GlError::ContextLost.kind(), FailureKind::TransientContextLoss);
        assert_eq!(
            GlError::Denylisted { renderer: "x".into() }.kind(),
            FailureKind::UnsupportedPlatform
        );
    }
}
