//! Backend reachability probe.

use reqwest::blocking::Client;

use super::PROBE_TIMEOUT;

/// Checks whether the backend is reachable right now.
///
/// The probe hits the ping endpoint without credentials and reports a
/// plain yes or no. Auth failures, server errors, and timeouts all
/// count as unreachable; the probe never errors.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    client: Client,
    ping_url: String,
}

impl ConnectivityProbe {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            ping_url: format!("{}/users/ping", base_url.trim_end_matches('/')),
        }
    }

    /// True only when the backend answered with a 2xx.
    pub fn is_available(&self) -> bool {
        match self.client.get(&self.ping_url).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Connectivity probe failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_probe_reports_available_on_success() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/users/ping"))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server),
        );

        let probe = ConnectivityProbe::new(&server.uri());
        assert!(probe.is_available());
    }

    #[test]
    fn test_probe_reports_unavailable_on_server_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/users/ping"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server),
        );

        let probe = ConnectivityProbe::new(&server.uri());
        assert!(!probe.is_available());
    }

    #[test]
    fn test_probe_reports_unavailable_when_unreachable() {
        let probe = ConnectivityProbe::new("http://127.0.0.1:9");
        assert!(!probe.is_available());
    }
}
