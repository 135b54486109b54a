use std::{sync::OnceLock, time::Duration};

use tracing::debug;

/// User agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("streamwatch/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout for upstream and delivery calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Install the aws-lc-rs rustls provider once per process.
///
/// reqwest is built with `rustls-tls-webpki-roots-no-provider`, so a provider
/// must exist before the first client is constructed.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared `reqwest::Client`.
pub fn build_http_client(request_timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .pool_max_idle_per_host(8);

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder.build()
}
