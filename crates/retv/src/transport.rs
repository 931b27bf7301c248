// Proxy-routed HTTP transport shared by every channel worker.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, redirect};
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::proxy;

/// One shared HTTP client for the whole process.
///
/// Redirect following is mandatory: the upstream delivers edge tokens via
/// 307 redirect, so the final URL of a response is load-bearing. The
/// client is cheap to clone (the pool is refcounted) and is passed
/// explicitly into every component that performs network I/O.
#[derive(Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(redirect::Policy::limited(10))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30));

        if let Some(proxy_config) = &config.proxy {
            builder = builder.proxy(proxy::build_proxy(proxy_config)?);
        }

        let client = builder.build()?;
        Ok(Self { client })
    }

    /// GET `url`, following redirects. Returns the body and the final URL
    /// after redirection. Fails on timeout, connection failure, or any
    /// non-success status.
    pub async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<(Bytes, String), EngineError> {
        let response = self.client.get(url).timeout(timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::http_status(status, url, "fetch"));
        }

        let final_url = response.url().to_string();
        let bytes = response.bytes().await?;
        Ok((bytes, final_url))
    }

    /// GET `url`, logging and swallowing any failure. Used wherever the
    /// caller already owns a retry/backoff policy, which in this engine
    /// is everywhere past token acquisition.
    pub async fn fetch_or_log(&self, url: &str, timeout: Duration) -> Option<Bytes> {
        match self.fetch(url, timeout).await {
            Ok((bytes, _)) => Some(bytes),
            Err(e) => {
                warn!(url, error = %e.stat_text(), "download failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyConfig;

    #[test]
    fn builds_without_proxy() {
        let config = EngineConfig::default();
        assert!(Transport::new(&config).is_ok());
    }

    #[test]
    fn builds_with_proxy() {
        let config = EngineConfig {
            proxy: Some(ProxyConfig::http("http://127.0.0.1:3129")),
            ..EngineConfig::default()
        };
        assert!(Transport::new(&config).is_ok());
    }
}
