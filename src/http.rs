use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::warn;

fn base_builder() -> ClientBuilder {
    let timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(15);
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
}

pub fn build_client() -> Client {
    base_builder().build().unwrap_or_else(|err| {
        warn!(target = "stager.http", error = %err, "client_build_failed_using_defaults");
        Client::new()
    })
}

/// Builder for pulling catalog images from the source image host.
///
/// Certificate validation is disabled for this client only. The source host
/// serves a chain that fails verification; this is a known, accepted risk and
/// must not spread to the catalog client.
pub fn image_client_builder() -> ClientBuilder {
    base_builder().danger_accept_invalid_certs(true)
}
