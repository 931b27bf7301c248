use reqwest::Proxy;

use crate::error::EngineError;

/// Scheme of the forward proxy endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Socks5,
}

/// Credentials for proxies requiring basic auth.
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Process-wide forward proxy configuration.
///
/// The engine routes every request (token acquisition, manifests,
/// segments) through this single endpoint; there is no per-call override.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy endpoint, e.g. `http://192.168.30.63:3129`.
    pub url: String,
    pub scheme: ProxyScheme,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            scheme: ProxyScheme::Http,
            auth: None,
        }
    }
}

/// Build the `reqwest::Proxy` applied to both HTTP and HTTPS traffic.
pub(crate) fn build_proxy(config: &ProxyConfig) -> Result<Proxy, EngineError> {
    let mut proxy = match config.scheme {
        ProxyScheme::Http => Proxy::all(&config.url)
            .map_err(|e| EngineError::proxy_configuration(format!("invalid proxy URL: {e}")))?,
        ProxyScheme::Socks5 => {
            let url = if config.url.starts_with("socks5://") || config.url.starts_with("socks5h://")
            {
                config.url.clone()
            } else {
                format!("socks5://{}", config.url)
            };
            Proxy::all(&url)
                .map_err(|e| EngineError::proxy_configuration(format!("invalid SOCKS5 URL: {e}")))?
        }
    };

    if let Some(auth) = &config.auth {
        proxy = proxy.basic_auth(&auth.username, &auth.password);
    }

    Ok(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_http_proxy() {
        let config = ProxyConfig::http("http://127.0.0.1:3129");
        assert!(build_proxy(&config).is_ok());
    }

    #[test]
    fn socks5_scheme_is_prefixed() {
        let config = ProxyConfig {
            url: "127.0.0.1:1080".to_owned(),
            scheme: ProxyScheme::Socks5,
            auth: None,
        };
        assert!(build_proxy(&config).is_ok());
    }
}
