//! Shared primitives used across the bridge crates.

mod clock;
mod model;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use model::AnchorSnapshot;
pub use model::AutoContext;
pub use model::collapse_whitespace;
pub use model::json_category;
pub use model::json_text;
pub use model::push_unique_text;
pub use model::CardSnapshot;
pub use model::CoverHeaders;
pub use model::ErrorReport;
pub use model::ExtractedMetadata;
pub use model::ImageSnapshot;
pub use model::PageSnapshot;

/// Result alias used across the workspace.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Workspace error: a dotted machine-readable code plus a human message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct BridgeError {
    pub code: &'static str,
    pub message: String,
}

impl BridgeError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true when the code sits under the given dotted namespace.
    pub fn is_in(&self, namespace: &str) -> bool {
        self.code
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::BridgeError;

    #[test]
    fn displays_code_and_message() {
        let error = BridgeError::new("sandbox.ready_timeout", "no ready signal");
        assert_eq!(error.to_string(), "sandbox.ready_timeout: no ready signal");
    }

    #[test]
    fn matches_code_namespace() {
        let error = BridgeError::new("storage.quota_exceeded", "full");
        assert!(error.is_in("storage"));
        assert!(!error.is_in("stor"));
        assert!(!error.is_in("sandbox"));
    }
}
