use std::time::Duration;

use depot_config::Config;
use reqwest::Client;

/// Builds the HTTP client used for fingerprint probes, checksum lookups and
/// plain URL downloads.
pub fn build_reqwest_client(config: Option<&Config>) -> Client {
    static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

    let config = if let Some(config) = config {
        config.clone()
    } else {
        Config::load_global()
    };

    if config.tls_no_verify() {
        tracing::warn!(
            "TLS verification is disabled. This is insecure and should only be used for testing or internal networks."
        );
    }

    let timeout = 5 * 60;
    Client::builder()
        .pool_max_idle_per_host(20)
        .user_agent(APP_USER_AGENT)
        .danger_accept_invalid_certs(config.tls_no_verify())
        .read_timeout(Duration::from_secs(timeout))
        .build()
        .expect("failed to create reqwest Client")
}
