//! News provider adapters.
//!
//! Each upstream API gets a [`WireFormat`] describing its request and
//! response shape; [`ProviderClient`] wraps a format with key rotation,
//! retries and timeouts and exposes it as a [`ProviderAdapter`].

pub mod adapter;
pub mod error;
pub mod newswire_a;
pub mod newswire_b;
pub mod types;

use std::sync::Arc;

pub use adapter::{ClientSettings, ProviderAdapter, ProviderClient, WireFormat};
pub use error::{FetchError, ProviderError, SchemaError};
pub use newswire_a::NewswireA;
pub use newswire_b::NewswireB;
pub use types::FetchParams;

use newsgate_coord::KeyPool;
use newsgate_core::{AppConfig, Provider};

/// Builds the adapter for a news `provider`, honouring any base-URL override
/// in `config`.
///
/// # Errors
///
/// Returns [`ProviderError`] if the HTTP client cannot be built, the base URL
/// is invalid, or `provider` does not serve news.
pub fn build_adapter(
    provider: Provider,
    config: &AppConfig,
    key_pool: Arc<KeyPool>,
    settings: ClientSettings,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    let base_url = config.credentials(provider).base_url.as_deref();
    match provider {
        Provider::NewswireA => {
            let base = base_url.unwrap_or(NewswireA.default_base_url());
            Ok(Arc::new(ProviderClient::with_base_url(
                NewswireA, base, key_pool, settings,
            )?))
        }
        Provider::NewswireB => {
            let base = base_url.unwrap_or(NewswireB.default_base_url());
            Ok(Arc::new(ProviderClient::with_base_url(
                NewswireB, base, key_pool, settings,
            )?))
        }
        Provider::Analysis => Err(ProviderError::NotNewsProvider(provider)),
    }
}
