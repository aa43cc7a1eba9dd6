//! Transport session built from a `TransportPolicy`.

use std::sync::Arc;

use thiserror::Error;

use crate::cache::CacheStore;
use crate::pinning::{default_roots, PinError, PinningVerifier};
use crate::policy::TransportPolicy;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Pinning(#[from] PinError),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// An HTTP client plus the cache store it reads and writes.
#[derive(Clone)]
pub struct Session {
    pub(crate) http: reqwest::Client,
    pub(crate) cache: Option<Arc<dyn CacheStore>>,
}

impl Session {
    pub fn build(policy: &TransportPolicy) -> Result<Self, SessionError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PinningVerifier::new(policy.pinning.clone(), default_roots(), provider.clone())?;

        let mut tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        tls.alpn_protocols = vec![b"http/1.1".to_vec()];

        let mut builder = reqwest::Client::builder().use_preconfigured_tls(tls);
        if let Some(timeout) = policy.timeout {
            builder = builder.timeout(timeout).connect_timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            cache: policy.cache.store().cloned(),
        })
    }
}
