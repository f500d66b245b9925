//! Retry classification and backoff state.

use crate::config::RetryConfig;
use crate::transport::TransportError;
use databay_protocol::HttpResponse;
use std::time::Duration;

/// Which kind of call a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    /// Metadata calls: datasets, branches, drafts, segments, upload sessions.
    Control,
    /// Bulk transfer calls: part uploads, finalize, object reads.
    Data,
}

/// What to do with the outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The call succeeded.
    Success,
    /// The call may succeed if sent again.
    Transient(String),
    /// Sending the call again will not help.
    Terminal,
}

/// Classifies one attempt.
///
/// Transport failures, 5xx and 429 are transient. On the data plane 409 is
/// transient too, since a part or finalize can race a previous attempt of
/// the same call. Every other status is terminal.
pub fn classify(plane: Plane, outcome: &Result<HttpResponse, TransportError>) -> Disposition {
    match outcome {
        Err(err) if err.is_retryable() => Disposition::Transient(err.to_string()),
        Err(_) => Disposition::Terminal,
        Ok(response) if response.is_success() => Disposition::Success,
        Ok(response) => match (plane, response.status) {
            (_, 429) | (_, 500..=599) => {
                Disposition::Transient(format!("server returned {}", response.status))
            }
            (Plane::Data, 409) => Disposition::Transient("server returned 409".to_string()),
            _ => Disposition::Terminal,
        },
    }
}

/// Counts attempts of one call and hands out backoff delays.
#[derive(Debug, Clone)]
pub struct RetryState {
    config: RetryConfig,
    attempts: u32,
}

impl RetryState {
    /// Creates the state for a new call.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Records a failed attempt. Returns the delay before the next one, or
    /// `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.config.max_attempts {
            None
        } else {
            Some(self.config.delay_for_attempt(self.attempts))
        }
    }

    /// Returns the number of attempts recorded as failed.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns true once no attempts are left.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use databay_protocol::ErrorCode;

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(code, Vec::new()))
    }

    #[test]
    fn transient_outcomes() {
        for outcome in [
            status(500),
            status(503),
            status(429),
            Err(TransportError::Timeout),
            Err(TransportError::Connection("reset".into())),
        ] {
            for plane in [Plane::Control, Plane::Data] {
                assert!(matches!(
                    classify(plane, &outcome),
                    Disposition::Transient(_)
                ));
            }
        }
    }

    #[test]
    fn conflicts_depend_on_plane() {
        let conflict = Ok(HttpResponse::error(ErrorCode::StaleDraft, "stale"));
        assert!(matches!(
            classify(Plane::Data, &conflict),
            Disposition::Transient(_)
        ));
        assert_eq!(classify(Plane::Control, &conflict), Disposition::Terminal);
    }

    #[test]
    fn terminal_outcomes() {
        assert_eq!(classify(Plane::Data, &status(404)), Disposition::Terminal);
        assert_eq!(classify(Plane::Data, &status(422)), Disposition::Terminal);
        assert_eq!(classify(Plane::Control, &status(400)), Disposition::Terminal);
        assert_eq!(
            classify(
                Plane::Control,
                &Err(TransportError::InvalidRequest("bad url".into()))
            ),
            Disposition::Terminal
        );
        assert_eq!(classify(Plane::Data, &status(204)), Disposition::Success);
    }

    #[test]
    fn budget_is_spent_after_max_attempts() {
        let config = RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(10))
            .with_jitter(false);
        let mut state = RetryState::new(config);

        assert_eq!(state.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(state.next_delay(), Some(Duration::from_millis(20)));
        assert!(!state.is_exhausted());
        assert_eq!(state.next_delay(), None);
        assert!(state.is_exhausted());
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn no_retry_fails_on_first_error() {
        let mut state = RetryState::new(RetryConfig::no_retry());
        assert_eq!(state.next_delay(), None);
    }
}
