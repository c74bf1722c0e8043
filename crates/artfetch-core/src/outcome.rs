//! Classified result of one fetch attempt

use crate::config::PageId;

/// Outcome of a single HTTP attempt for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 2xx with the decoded body
    Success { status: u16, body: String },
    /// Any non-2xx status below 500
    ClientError { status: u16 },
    /// 5xx (including CDN codes such as 530)
    ServerError { status: u16 },
    /// Connection, DNS, TLS or body-read failure
    TransportError { cause: String },
    Timeout,
}

/// Failure classes reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Client,
    Server,
    Transport,
    Timeout,
    Extraction,
}

impl FailureClass {
    pub const ALL: [Self; 5] = [
        Self::Client,
        Self::Server,
        Self::Transport,
        Self::Timeout,
        Self::Extraction,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Client => "client error",
            Self::Server => "server error",
            Self::Transport => "transport error",
            Self::Timeout => "timeout",
            Self::Extraction => "extraction failure",
        }
    }
}

impl FetchOutcome {
    /// Classify a response status. `body` is only kept for 2xx.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            200..=299 => Self::Success { status, body },
            500..=u16::MAX => Self::ServerError { status },
            _ => Self::ClientError { status },
        }
    }

    /// Map a reqwest error, stripping the URL from the message.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = e.status() {
            return Self::from_status(status.as_u16(), String::new());
        }
        Self::TransportError {
            cause: e.without_url().to_string(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Success { .. } => false,
            // 408 Request Timeout, 425 Too Early, 429 Too Many Requests
            Self::ClientError { status } => matches!(status, 408 | 425 | 429),
            Self::ServerError { .. } | Self::TransportError { .. } | Self::Timeout => true,
        }
    }

    pub const fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Success { .. } => None,
            Self::ClientError { .. } => Some(FailureClass::Client),
            Self::ServerError { .. } => Some(FailureClass::Server),
            Self::TransportError { .. } => Some(FailureClass::Transport),
            Self::Timeout => Some(FailureClass::Timeout),
        }
    }
}

impl std::fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success { status, body } => write!(f, "HTTP {status} ({} bytes)", body.len()),
            Self::ClientError { status } | Self::ServerError { status } => {
                write!(f, "HTTP {status}")
            }
            Self::TransportError { cause } => write!(f, "transport error: {cause}"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Terminal outcome of one logical fetch (after retries).
#[derive(Debug, Clone)]
pub struct Fetched {
    pub page_id: PageId,
    pub outcome: FetchOutcome,
    /// Total attempts made, initial one included
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(FetchOutcome::from_status(200, "x".into()).is_success());
        assert_eq!(
            FetchOutcome::from_status(404, "ignored".into()),
            FetchOutcome::ClientError { status: 404 }
        );
        assert_eq!(
            FetchOutcome::from_status(530, String::new()),
            FetchOutcome::ServerError { status: 530 }
        );
        assert_eq!(
            FetchOutcome::from_status(304, String::new()),
            FetchOutcome::ClientError { status: 304 }
        );
    }

    #[test]
    fn http_404_not_retryable() {
        assert!(!FetchOutcome::ClientError { status: 404 }.is_retryable());
    }

    #[test]
    fn http_403_not_retryable() {
        assert!(!FetchOutcome::ClientError { status: 403 }.is_retryable());
    }

    #[test]
    fn http_429_retryable() {
        assert!(FetchOutcome::ClientError { status: 429 }.is_retryable());
    }

    #[test]
    fn http_5xx_retryable() {
        assert!(FetchOutcome::ServerError { status: 500 }.is_retryable());
        assert!(FetchOutcome::ServerError { status: 530 }.is_retryable());
    }

    #[test]
    fn transport_and_timeout_retryable() {
        let err = FetchOutcome::TransportError {
            cause: "connection refused".to_string(),
        };
        assert!(err.is_retryable());
        assert!(FetchOutcome::Timeout.is_retryable());
    }

    #[test]
    fn success_has_no_failure_class() {
        let ok = FetchOutcome::Success {
            status: 200,
            body: String::new(),
        };
        assert_eq!(ok.failure_class(), None);
        assert!(!ok.is_retryable());
        assert_eq!(FetchOutcome::Timeout.failure_class(), Some(FailureClass::Timeout));
    }

    #[test]
    fn display_variants() {
        assert_eq!(format!("{}", FetchOutcome::ClientError { status: 404 }), "HTTP 404");
        assert_eq!(format!("{}", FetchOutcome::Timeout), "timeout");
        let err = FetchOutcome::TransportError {
            cause: "reset".to_string(),
        };
        assert_eq!(format!("{err}"), "transport error: reset");
    }
}
