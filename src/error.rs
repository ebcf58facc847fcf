use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// No matching reply within the request timeout. Routine: the agent is
    /// not installed or has not visited the site yet.
    #[error("agent unavailable: no reply to {request} within {timeout:?}")]
    AgentUnavailable {
        request: &'static str,
        timeout: Duration,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("catalog fetch failed: {0}")]
    CatalogFetch(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn is_agent_unavailable(&self) -> bool {
        matches!(self, SyncError::AgentUnavailable { .. })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("fjall: {0}")]
    Backend(#[from] fjall::Error),

    #[error("encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt key: {0}")]
    CorruptKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_unavailable_is_classified() {
        let err = SyncError::AgentUnavailable {
            request: "manifest_since",
            timeout: Duration::from_millis(500),
        };
        assert!(err.is_agent_unavailable());
        assert!(err.to_string().contains("manifest_since"));

        let err = SyncError::Protocol("bad manifest".into());
        assert!(!err.is_agent_unavailable());
    }

    #[test]
    fn test_store_error_converts() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: SyncError = StoreError::from(json_err).into();
        assert!(matches!(err, SyncError::Store(StoreError::Encoding(_))));
    }
}
