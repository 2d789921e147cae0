use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;
use tracing::warn;

use crate::config::{Config, CONFIG};

const USER_AGENT: &str = concat!("image-merge-server/", env!("CARGO_PKG_VERSION"));

/// Timeouts for provider calls and image downloads. Generation can take well
/// over a minute, so the request timeout is much longer than the connect one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl HttpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.http_connect_timeout_secs),
            timeout: Duration::from_secs(config.http_timeout_secs),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(180),
        }
    }
}

pub fn build_http_client(settings: HttpSettings) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.timeout)
        .user_agent(USER_AGENT)
        .build()
}

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    let settings = HttpSettings::from_config(&CONFIG);
    build_http_client(settings).unwrap_or_else(|err| {
        warn!(
            "Failed to build HTTP client with {:?}, using reqwest defaults: {}",
            settings, err
        );
        Client::new()
    })
});

/// Shared by the provider clients and the session store's image downloads.
pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_room_for_slow_generations() {
        let settings = HttpSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert!(settings.timeout >= Duration::from_secs(120));
    }

    #[test]
    fn builds_a_client_from_custom_timeouts() {
        let settings = HttpSettings {
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        };
        assert!(build_http_client(settings).is_ok());
        assert!(USER_AGENT.starts_with("image-merge-server/"));
    }
}
