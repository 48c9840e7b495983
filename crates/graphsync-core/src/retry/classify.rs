//! Classify one attempt's status and transport error into a retry decision.

use std::time::Duration;

use crate::error::TransportError;
use crate::wire::Response;

/// Outcome of classifying a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Do not replay: success for 2xx/3xx, a permanent rejection for other 4xx.
    NoRetry,
    /// Replay without an extra delay. Used for 503/504, which the wire
    /// client's own retry layer has already backed off on.
    RetryNow,
    /// Replay after exponential backoff, or after the server hint when present.
    RetryAfter(Option<Duration>),
    /// Inconsistent input; never replayed.
    Fatal,
}

impl Decision {
    pub fn is_retry(self) -> bool {
        matches!(self, Decision::RetryNow | Decision::RetryAfter(_))
    }
}

/// Classify a status code and/or transport error. First matching rule wins.
pub fn classify(status: Option<u16>, err: Option<&TransportError>) -> Decision {
    if err.is_some_and(TransportError::is_transient_transport) {
        return Decision::RetryAfter(None);
    }

    match (status, err) {
        (Some(200..=399), None) => Decision::NoRetry,
        (Some(429 | 502), None) => Decision::RetryAfter(None),
        (Some(400..=499), None) => Decision::NoRetry,
        (Some(503 | 504), None) => Decision::RetryNow,
        (Some(500..=599), None) => Decision::RetryAfter(None),
        (_, Some(_)) => Decision::RetryAfter(None),
        (Some(_), None) | (None, None) => Decision::Fatal,
    }
}

/// Classify a completed response, folding in its `Retry-After` hint.
pub fn classify_response(resp: &Response) -> Decision {
    match classify(Some(resp.status), None) {
        Decision::RetryAfter(_) => Decision::RetryAfter(resp.retry_after()),
        other => other,
    }
}

/// Classify an attempt that produced no response.
pub fn classify_error(err: &TransportError) -> Decision {
    classify(None, Some(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_not_retried() {
        assert_eq!(classify(Some(200), None), Decision::NoRetry);
        assert_eq!(classify(Some(204), None), Decision::NoRetry);
        assert_eq!(classify(Some(302), None), Decision::NoRetry);
    }

    #[test]
    fn client_errors_are_not_retried() {
        assert_eq!(classify(Some(400), None), Decision::NoRetry);
        assert_eq!(classify(Some(403), None), Decision::NoRetry);
        assert_eq!(classify(Some(404), None), Decision::NoRetry);
        assert_eq!(classify(Some(410), None), Decision::NoRetry);
    }

    #[test]
    fn throttling_and_bad_gateway_back_off() {
        assert_eq!(classify(Some(429), None), Decision::RetryAfter(None));
        assert_eq!(classify(Some(502), None), Decision::RetryAfter(None));
        assert_eq!(classify(Some(500), None), Decision::RetryAfter(None));
    }

    #[test]
    fn unavailable_and_gateway_timeout_are_delegated() {
        assert_eq!(classify(Some(503), None), Decision::RetryNow);
        assert_eq!(classify(Some(504), None), Decision::RetryNow);
    }

    #[test]
    fn reset_and_timeout_win_over_status() {
        let reset = TransportError::ConnectionReset;
        assert_eq!(classify(None, Some(&reset)), Decision::RetryAfter(None));
        assert_eq!(classify(Some(200), Some(&reset)), Decision::RetryAfter(None));
        assert_eq!(classify(Some(400), Some(&reset)), Decision::RetryAfter(None));
        assert_eq!(
            classify(None, Some(&TransportError::HandlerTimeout)),
            Decision::RetryAfter(None)
        );
    }

    #[test]
    fn other_errors_without_status_back_off() {
        let err = TransportError::Other("tls handshake".into());
        assert_eq!(classify(None, Some(&err)), Decision::RetryAfter(None));
        let auth = TransportError::Auth("token endpoint down".into());
        assert_eq!(classify_error(&auth), Decision::RetryAfter(None));
    }

    #[test]
    fn inconsistent_input_is_fatal() {
        assert_eq!(classify(None, None), Decision::Fatal);
        assert_eq!(classify(Some(101), None), Decision::Fatal);
        assert_eq!(classify(Some(700), None), Decision::Fatal);
    }

    #[test]
    fn retry_after_header_becomes_hint() {
        let resp = Response::new(429).with_header("Retry-After", "5");
        assert_eq!(
            classify_response(&resp),
            Decision::RetryAfter(Some(Duration::from_secs(5)))
        );
        let unavailable = Response::new(503).with_header("Retry-After", "5");
        assert_eq!(classify_response(&unavailable), Decision::RetryNow);
    }

    #[test]
    fn only_retry_decisions_replay() {
        assert!(Decision::RetryNow.is_retry());
        assert!(Decision::RetryAfter(None).is_retry());
        assert!(!Decision::NoRetry.is_retry());
        assert!(!Decision::Fatal.is_retry());
    }
}
