// ivr-common/src/config.rs
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::error::{IvrError, Result};

const SETTINGS_FILENAME: &str = "ivr-settings.toml";
const DEFAULT_PATTERN: &str = "lib/[artifact]-[revision].[ext]";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ROUNDS: usize = 32;

/// Which conflict manager picks a winner when several revisions of one module
/// are requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictManagerKind {
    #[default]
    LatestRevision,
    LatestCompatible,
    Strict,
}

impl FromStr for ConflictManagerKind {
    type Err = IvrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "latest-revision" => Ok(Self::LatestRevision),
            "latest-compatible" => Ok(Self::LatestCompatible),
            "strict" => Ok(Self::Strict),
            other => Err(IvrError::Config(format!(
                "unknown conflict manager '{other}' (expected latest-revision, latest-compatible or strict)"
            ))),
        }
    }
}

impl fmt::Display for ConflictManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LatestRevision => "latest-revision",
            Self::LatestCompatible => "latest-compatible",
            Self::Strict => "strict",
        })
    }
}

/// What to do when the dependency graph contains a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircularStrategy {
    #[default]
    Error,
    Warn,
    Ignore,
}

impl FromStr for CircularStrategy {
    type Err = IvrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "ignore" => Ok(Self::Ignore),
            other => Err(IvrError::Config(format!(
                "unknown circular dependency strategy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub retry_not_found: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            retry_not_found: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cache_dir: PathBuf,
    /// Filesystem paths or http(s) base URLs, consulted in order.
    pub repositories: Vec<String>,
    pub workers: usize,
    pub fetch_timeout: Duration,
    pub retry: RetrySettings,
    pub conflict_manager: ConflictManagerKind,
    pub circular: CircularStrategy,
    pub offline: bool,
    pub max_rounds: usize,
    pub retrieve_pattern: String,
}

/// On-disk settings file. Every field is optional and overrides the default.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct SettingsFile {
    cache_dir: Option<PathBuf>,
    repositories: Option<Vec<String>>,
    workers: Option<usize>,
    fetch_timeout: Option<String>,
    retry_attempts: Option<u32>,
    retry_initial_backoff: Option<String>,
    retry_max_backoff: Option<String>,
    retry_not_found: Option<bool>,
    conflict_manager: Option<ConflictManagerKind>,
    circular: Option<CircularStrategy>,
    offline: Option<bool>,
    max_rounds: Option<usize>,
    retrieve_pattern: Option<String>,
}

fn parse_duration(value: &str, what: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| IvrError::Config(format!("invalid {what} '{value}': {e}")))
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let cache_dir = dirs::cache_dir()
            .map(|d| d.join("ivr"))
            .unwrap_or_else(|| home.join(".ivr").join("cache"));
        Self {
            cache_dir,
            repositories: vec![home.join(".ivr").join("local").display().to_string()],
            workers: num_cpus::get().max(1),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            retry: RetrySettings::default(),
            conflict_manager: ConflictManagerKind::default(),
            circular: CircularStrategy::default(),
            offline: false,
            max_rounds: DEFAULT_MAX_ROUNDS,
            retrieve_pattern: DEFAULT_PATTERN.to_string(),
        }
    }
}

impl Config {
    /// Defaults, then `./ivr-settings.toml` if present, then environment.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Like [`Config::load`] but reads the given settings file instead of
    /// looking for one in the working directory.
    pub fn load_with(settings: Option<&Path>) -> Result<Self> {
        debug!("Loading ivr configuration");
        let mut config = Config::default();

        let settings_path = match settings {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let local = PathBuf::from(SETTINGS_FILENAME);
                local.is_file().then_some(local)
            }
        };
        if let Some(path) = settings_path {
            debug!("Reading settings file {}", path.display());
            let text = std::fs::read_to_string(&path).map_err(|e| {
                IvrError::Config(format!(
                    "cannot read settings file {}: {e}",
                    path.display()
                ))
            })?;
            config.apply_settings(&text)?;
        }

        config.apply_env()?;
        config.validate()?;
        debug!(
            "Configuration loaded: cache={}, repositories={:?}, workers={}",
            config.cache_dir.display(),
            config.repositories,
            config.workers
        );
        Ok(config)
    }

    fn apply_settings(&mut self, text: &str) -> Result<()> {
        let file: SettingsFile = toml::from_str(text)
            .map_err(|e| IvrError::Config(format!("invalid settings file: {}", e.message())))?;
        if let Some(dir) = file.cache_dir {
            self.cache_dir = dir;
        }
        if let Some(repos) = file.repositories {
            self.repositories = repos;
        }
        if let Some(workers) = file.workers {
            self.workers = workers;
        }
        if let Some(timeout) = file.fetch_timeout {
            self.fetch_timeout = parse_duration(&timeout, "fetch-timeout")?;
        }
        if let Some(attempts) = file.retry_attempts {
            self.retry.attempts = attempts;
        }
        if let Some(backoff) = file.retry_initial_backoff {
            self.retry.initial_backoff = parse_duration(&backoff, "retry-initial-backoff")?;
        }
        if let Some(backoff) = file.retry_max_backoff {
            self.retry.max_backoff = parse_duration(&backoff, "retry-max-backoff")?;
        }
        if let Some(flag) = file.retry_not_found {
            self.retry.retry_not_found = flag;
        }
        if let Some(kind) = file.conflict_manager {
            self.conflict_manager = kind;
        }
        if let Some(circular) = file.circular {
            self.circular = circular;
        }
        if let Some(offline) = file.offline {
            self.offline = offline;
        }
        if let Some(rounds) = file.max_rounds {
            self.max_rounds = rounds;
        }
        if let Some(pattern) = file.retrieve_pattern {
            self.retrieve_pattern = pattern;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env::var("IVR_CACHE_DIR").ok().filter(|s| !s.is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(repos) = env::var("IVR_REPOSITORIES").ok().filter(|s| !s.is_empty()) {
            self.repositories = repos
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(workers) = env::var("IVR_WORKERS") {
            self.workers = workers
                .parse()
                .map_err(|_| IvrError::Config(format!("invalid IVR_WORKERS '{workers}'")))?;
        }
        if let Ok(secs) = env::var("IVR_FETCH_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                IvrError::Config(format!("invalid IVR_FETCH_TIMEOUT_SECS '{secs}'"))
            })?;
            self.fetch_timeout = Duration::from_secs(secs);
        }
        if let Ok(attempts) = env::var("IVR_RETRY_ATTEMPTS") {
            self.retry.attempts = attempts.parse().map_err(|_| {
                IvrError::Config(format!("invalid IVR_RETRY_ATTEMPTS '{attempts}'"))
            })?;
        }
        if let Some(offline) = env_flag("IVR_OFFLINE") {
            self.offline = offline;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(IvrError::Config("workers must be at least 1".to_string()));
        }
        if self.retry.attempts == 0 {
            return Err(IvrError::Config(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(IvrError::Config("max-rounds must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.cache_dir.join(".logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_file_overrides_defaults() {
        let mut config = Config::default();
        config
            .apply_settings(
                r#"
cache-dir = "/tmp/ivr-cache"
repositories = ["/srv/repo", "https://repo.example.com/ivr"]
workers = 3
fetch-timeout = "5s"
retry-attempts = 5
retry-max-backoff = "2s"
conflict-manager = "latest-compatible"
circular = "warn"
retrieve-pattern = "libs/[module]/[artifact].[ext]"
"#,
            )
            .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/ivr-cache"));
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.workers, 3);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.max_backoff, Duration::from_secs(2));
        assert_eq!(config.conflict_manager, ConflictManagerKind::LatestCompatible);
        assert_eq!(config.circular, CircularStrategy::Warn);
        assert_eq!(config.retrieve_pattern, "libs/[module]/[artifact].[ext]");
    }

    #[test]
    fn rejects_unknown_settings_and_bad_durations() {
        let mut config = Config::default();
        assert!(config.apply_settings("colour = \"blue\"").is_err());
        assert!(config.apply_settings("fetch-timeout = \"soon\"").is_err());
    }

    #[test]
    fn explicit_settings_path_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "max-rounds = 7\noffline = true\n").unwrap();
        let config = Config::load_with(Some(&path)).unwrap();
        assert_eq!(config.max_rounds, 7);
        assert!(config.offline || env_flag("IVR_OFFLINE") == Some(false));
    }

    #[test]
    fn conflict_manager_names() {
        assert_eq!(
            "strict".parse::<ConflictManagerKind>().unwrap(),
            ConflictManagerKind::Strict
        );
        assert!("newest".parse::<ConflictManagerKind>().is_err());
        assert_eq!(ConflictManagerKind::LatestRevision.to_string(), "latest-revision");
    }
}
