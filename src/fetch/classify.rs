use crate::error::{FetchError, PermanentCause, TransientCause};
use crate::fetch::source::RawFailure;

const BODY_SAMPLE: usize = 200;

/// First `BODY_SAMPLE` characters of a response body.
fn body_sample(body: &str) -> &str {
    body.char_indices()
        .nth(BODY_SAMPLE)
        .map_or(body, |(i, _)| &body[..i])
}

/// Maps a wire failure onto the retry taxonomy. Every retry decision goes through here.
pub fn classify(raw: &RawFailure) -> FetchError {
    match raw {
        RawFailure::Timeout(m) => transient(TransientCause::Timeout, m, None),
        RawFailure::Connect(m) => transient(TransientCause::Connect, m, None),
        RawFailure::Body(m) => transient(TransientCause::Body, m, None),
        RawFailure::Status {
            status,
            retry_after,
            body,
        } => {
            let sample = body_sample(body);
            match *status {
                408 => transient(TransientCause::Timeout, sample, None),
                429 => transient(TransientCause::RateLimited, sample, *retry_after),
                s if s >= 500 => transient(TransientCause::Server(s), sample, *retry_after),
                400 | 422 => permanent(PermanentCause::BadRequest(*status), sample),
                404 => permanent(PermanentCause::NotFound, sample),
                401 | 403 => permanent(PermanentCause::Unauthorized(*status), sample),
                s => permanent(PermanentCause::Client(s), sample),
            }
        }
    }
}

fn transient(
    cause: TransientCause,
    message: &str,
    retry_after: Option<std::time::Duration>,
) -> FetchError {
    FetchError::Transient {
        cause,
        message: message.to_string(),
        retry_after,
    }
}

fn permanent(cause: PermanentCause, message: &str) -> FetchError {
    FetchError::Permanent {
        cause,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status(code: u16) -> RawFailure {
        RawFailure::Status {
            status: code,
            retry_after: None,
            body: String::new(),
        }
    }

    #[test]
    fn retryable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(classify(&status(code)).is_retryable(), "{code} should retry");
        }
        assert!(classify(&RawFailure::Timeout("read".into())).is_retryable());
        assert!(classify(&RawFailure::Connect("refused".into())).is_retryable());
        assert!(classify(&RawFailure::Body("eof while parsing".into())).is_retryable());
    }

    #[test]
    fn permanent_statuses() {
        assert!(matches!(
            classify(&status(404)),
            FetchError::Permanent { cause: PermanentCause::NotFound, .. }
        ));
        assert!(matches!(
            classify(&status(403)),
            FetchError::Permanent { cause: PermanentCause::Unauthorized(403), .. }
        ));
        assert!(matches!(
            classify(&status(400)),
            FetchError::Permanent { cause: PermanentCause::BadRequest(400), .. }
        ));
        assert!(!classify(&status(418)).is_retryable());
    }

    #[test]
    fn rate_limit_keeps_retry_after_hint() {
        let raw = RawFailure::Status {
            status: 429,
            retry_after: Some(Duration::from_secs(7)),
            body: "x".repeat(1000),
        };
        let err = classify(&raw);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        if let FetchError::Transient { message, .. } = err {
            assert_eq!(message.len(), BODY_SAMPLE);
        }
    }

    #[test]
    fn body_sample_cuts_on_char_boundary() {
        let body = format!("{}é and more", "a".repeat(BODY_SAMPLE - 1));
        let err = classify(&RawFailure::Status {
            status: 502,
            retry_after: None,
            body,
        });
        let FetchError::Transient { message, .. } = err else {
            panic!("502 should be transient");
        };
        assert_eq!(message.chars().count(), BODY_SAMPLE);
        assert!(message.ends_with('é'));
        assert_eq!(body_sample("short"), "short");
    }
}
