use thiserror::Error;

/// Failures surfaced at a stage boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Member API unreachable, rejected the request, or answered with a body
    /// that is not a recognised page.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Analytical store could not be opened or queried.
    #[error("store unavailable: {0}")]
    Store(#[from] rusqlite::Error),

    /// Staging dataset missing, headerless or malformed.
    #[error("staging data unavailable: {0}")]
    DataUnavailable(String),

    /// Raw API entry without a usable member id. Skipped per record.
    #[error("malformed member record: {0}")]
    MalformedRecord(String),

    /// Batch insert rejected by the analytical store.
    #[error("store write failed: {0}")]
    StoreWrite(#[source] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure_class() {
        let e = PipelineError::DataUnavailable("no such file".into());
        assert_eq!(e.to_string(), "staging data unavailable: no such file");

        let e = PipelineError::StoreWrite(rusqlite::Error::QueryReturnedNoRows);
        assert!(e.to_string().starts_with("store write failed"));
    }
}
