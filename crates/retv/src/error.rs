use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("channel stopped")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("manifest error: {reason}")]
    Manifest { reason: String },

    #[error("incomplete segment pair at timestamp {timestamp}")]
    PartialSegment { timestamp: u64 },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    /// Whether the worker loop should keep retrying after this error.
    ///
    /// Everything a running channel can hit at steady state is transient;
    /// only cancellation and broken configuration are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Cancelled | Self::InvalidUrl { .. } | Self::ProxyConfiguration { .. } => false,
            Self::Network { .. }
            | Self::HttpStatus { .. }
            | Self::Manifest { .. }
            | Self::PartialSegment { .. }
            | Self::Io { .. } => true,
        }
    }

    /// Short form recorded into a channel's `last_error` stat.
    pub fn stat_text(&self) -> String {
        let text = self.to_string();
        if text.len() > 200 {
            let mut cut = 200;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text[..cut].to_owned()
        } else {
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EngineError::manifest("no video track").is_transient());
        assert!(EngineError::PartialSegment { timestamp: 42 }.is_transient());
        assert!(
            EngineError::http_status(StatusCode::BAD_GATEWAY, "http://e/seg", "segment fetch")
                .is_transient()
        );
        assert!(!EngineError::Cancelled.is_transient());
        assert!(!EngineError::proxy_configuration("bad scheme").is_transient());
    }

    #[test]
    fn stat_text_is_bounded() {
        let err = EngineError::manifest("x".repeat(500));
        assert!(err.stat_text().len() <= 200);
    }
}
