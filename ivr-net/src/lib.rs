// ivr-net/src/lib.rs
pub mod chain;
pub mod fetcher;
pub mod filesystem;
pub mod http;
pub mod memory;
pub mod retry;
pub mod validation;

use std::sync::Arc;

use ivr_common::config::Config;
use ivr_common::error::{IvrError, Result};
use tracing::debug;

pub use chain::RepositoryChain;
pub use fetcher::{select_revision, Fetcher};
pub use filesystem::FileSystemRepository;
pub use http::{build_http_client, HttpRepository};
pub use memory::MemoryFetcher;
pub use retry::{RetryPolicy, RetryingFetcher};
pub use validation::validate_url;

/// Builds the repository chain described by the configuration, wrapped in
/// the configured retry policy.
pub fn build_fetcher(config: &Config) -> Result<Arc<dyn Fetcher>> {
    if config.repositories.is_empty() {
        return Err(IvrError::Config("no repositories configured".to_string()));
    }
    let mut client = None;
    let mut repositories: Vec<Arc<dyn Fetcher>> = Vec::with_capacity(config.repositories.len());
    for location in &config.repositories {
        if validation::is_remote(location) {
            if client.is_none() {
                client = Some(build_http_client(config.fetch_timeout)?);
            }
            if let Some(http) = &client {
                repositories.push(Arc::new(HttpRepository::new(location, http.clone())?));
            }
        } else {
            repositories.push(Arc::new(FileSystemRepository::new(location)));
        }
        debug!("Configured repository {}", location);
    }
    let chain: Arc<dyn Fetcher> = Arc::new(RepositoryChain::new(repositories));
    Ok(Arc::new(RetryingFetcher::new(
        chain,
        RetryPolicy::from_config(config),
    )))
}
