use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum IvrError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("TOML Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Malformed descriptor: field '{field}': {message}")]
    MalformedDescriptor { field: String, message: String },

    #[error("Unresolvable conflict for '{module}':\n  {}", .paths.join("\n  "))]
    UnresolvableConflict { module: String, paths: Vec<String> },

    #[error("Cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("Network Error: {0}")]
    Network(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error(
        "Retrieval conflict: '{first}' and '{second}' both map to {}",
        .destination.display()
    )]
    RetrievalConflict {
        destination: PathBuf,
        first: String,
        second: String,
    },

    #[error("Retrieval failed for {} artifact(s):\n  {}", .failures.len(), .failures.join("\n  "))]
    PartialRetrieval {
        written: Vec<PathBuf>,
        failures: Vec<String>,
    },

    #[error("Cache Error: {0}")]
    Cache(String),

    #[error("Checksum Error: {0}")]
    ChecksumError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{} independent failure(s):\n  {}", .0.len(), .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n  "))]
    Aggregate(Vec<IvrError>),

    #[error("{context}: {source}")]
    Context {
        context: String,
        source: Box<IvrError>,
    },

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl IvrError {
    /// Wraps the error with a description of what was being processed.
    pub fn context(self, context: impl Into<String>) -> Self {
        IvrError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        IvrError::MalformedDescriptor {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The innermost error behind any number of context layers.
    pub fn root_cause(&self) -> &IvrError {
        match self {
            IvrError::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Network failures and timeouts are worth another attempt; `NotFound` only
    /// when the caller asks for it.
    pub fn is_retryable(&self, retry_not_found: bool) -> bool {
        match self.root_cause() {
            IvrError::Network(_) | IvrError::Http(_) => true,
            IvrError::NotFound(_) => retry_not_found,
            _ => false,
        }
    }

    /// Process exit code for the CLI. Aggregates report the most severe kind
    /// they contain.
    pub fn exit_code(&self) -> i32 {
        match self.root_cause() {
            IvrError::UnresolvableConflict { .. } => 2,
            IvrError::CyclicDependency { .. } => 3,
            IvrError::Network(_) | IvrError::Http(_) => 4,
            IvrError::Aggregate(errors) => {
                let codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
                [2, 3, 4]
                    .into_iter()
                    .find(|code| codes.contains(code))
                    .unwrap_or(1)
            }
            _ => 1,
        }
    }

    /// Collapses a list of failures: none is `Ok`, one is itself, more become
    /// an `Aggregate`.
    pub fn aggregate(mut errors: Vec<IvrError>) -> std::result::Result<(), IvrError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(IvrError::Aggregate(errors)),
        }
    }
}

impl From<std::io::Error> for IvrError {
    fn from(err: std::io::Error) -> Self {
        IvrError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for IvrError {
    fn from(err: reqwest::Error) -> Self {
        IvrError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for IvrError {
    fn from(err: serde_json::Error) -> Self {
        IvrError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for IvrError {
    fn from(err: toml::de::Error) -> Self {
        IvrError::Toml(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, IvrError>;

/// Adds context to the error side of a `Result`.
pub trait ResultExt<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_see_through_context() {
        let err = IvrError::CyclicDependency {
            path: vec!["a#a".into(), "b#b".into(), "a#a".into()],
        }
        .context("resolving a#app;1.0 (default)");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn aggregate_exit_code_prefers_conflicts() {
        let err = IvrError::Aggregate(vec![
            IvrError::Network("timeout".into()),
            IvrError::UnresolvableConflict {
                module: "org#util".into(),
                paths: vec![],
            }
            .context("round 1"),
        ]);
        assert_eq!(err.exit_code(), 2);

        let only_network = IvrError::Aggregate(vec![
            IvrError::Network("a".into()),
            IvrError::NotFound("b".into()),
        ]);
        assert_eq!(only_network.exit_code(), 4);
    }

    #[test]
    fn not_found_retry_is_opt_in() {
        let err = IvrError::NotFound("org#lib".into()).context("fetching");
        assert!(!err.is_retryable(false));
        assert!(err.is_retryable(true));
        assert!(IvrError::Network("reset".into()).is_retryable(false));
        assert!(!IvrError::malformed("module", "missing").is_retryable(true));
    }

    #[test]
    fn aggregate_collapses_single_error() {
        assert!(IvrError::aggregate(vec![]).is_ok());
        match IvrError::aggregate(vec![IvrError::Cancelled]) {
            Err(IvrError::Cancelled) => {}
            other => panic!("unexpected {other:?}"),
        }
        match IvrError::aggregate(vec![IvrError::Cancelled, IvrError::Cancelled]) {
            Err(IvrError::Aggregate(errs)) => assert_eq!(errs.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
