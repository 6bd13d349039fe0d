use http::{Method, StatusCode};

use crate::error::{Error, TransportFailure};
use crate::response::RawResponse;
use crate::util::truncate_body;

/// Maps a response onto the error taxonomy. `Ok(())` means 2xx.
///
/// Pure: depends only on the response and the request identity used in the
/// error message, never on attempt history.
pub(crate) fn classify_response(
    response: &RawResponse,
    method: &Method,
    redacted_uri: &str,
) -> Result<(), Error> {
    let status = response.status();
    if StatusCode::from_u16(status).is_err() {
        return Err(Error::CastFailure {
            status,
            method: method.clone(),
            uri: redacted_uri.to_owned(),
        });
    }

    match status {
        200..=299 => Ok(()),
        300..=399 => Err(Error::Redirection {
            status,
            method: method.clone(),
            uri: redacted_uri.to_owned(),
            body: truncate_body(response.body()),
        }),
        400..=499 => Err(Error::ClientError {
            status,
            method: method.clone(),
            uri: redacted_uri.to_owned(),
            body: truncate_body(response.body()),
        }),
        500..=599 => Err(Error::ServerError {
            status,
            method: method.clone(),
            uri: redacted_uri.to_owned(),
            body: truncate_body(response.body()),
        }),
        _ => Err(Error::UnknownStatus {
            status,
            method: method.clone(),
            uri: redacted_uri.to_owned(),
        }),
    }
}

pub(crate) fn classify_transport_failure(
    failure: TransportFailure,
    method: &Method,
    redacted_uri: &str,
) -> Error {
    Error::Transport {
        kind: failure.kind(),
        method: method.clone(),
        uri: redacted_uri.to_owned(),
        source: failure.into_source(),
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, Method};

    use super::{classify_response, classify_transport_failure};
    use crate::error::{ErrorCode, TransportErrorKind, TransportFailure};
    use crate::response::RawResponse;

    fn code_for(status: u16) -> Option<ErrorCode> {
        let response = RawResponse::new(status, HeaderMap::new(), "body");
        classify_response(&response, &Method::GET, "https://example.com/")
            .err()
            .map(|error| error.code())
    }

    #[test]
    fn status_ranges_map_onto_taxonomy() {
        assert_eq!(code_for(200), None);
        assert_eq!(code_for(204), None);
        assert_eq!(code_for(299), None);
        assert_eq!(code_for(301), Some(ErrorCode::Redirection));
        assert_eq!(code_for(304), Some(ErrorCode::Redirection));
        assert_eq!(code_for(400), Some(ErrorCode::ClientError));
        assert_eq!(code_for(404), Some(ErrorCode::ClientError));
        assert_eq!(code_for(429), Some(ErrorCode::ClientError));
        assert_eq!(code_for(500), Some(ErrorCode::ServerError));
        assert_eq!(code_for(503), Some(ErrorCode::ServerError));
        assert_eq!(code_for(599), Some(ErrorCode::ServerError));
    }

    #[test]
    fn statuses_outside_known_classes_are_unknown() {
        assert_eq!(code_for(101), Some(ErrorCode::UnknownStatus));
        assert_eq!(code_for(600), Some(ErrorCode::UnknownStatus));
        assert_eq!(code_for(999), Some(ErrorCode::UnknownStatus));
    }

    #[test]
    fn unreadable_status_is_cast_failure() {
        assert_eq!(code_for(0), Some(ErrorCode::CastFailure));
        assert_eq!(code_for(42), Some(ErrorCode::CastFailure));
        assert_eq!(code_for(1000), Some(ErrorCode::CastFailure));
    }

    #[test]
    fn status_error_keeps_code_and_body() {
        let response = RawResponse::new(404, HeaderMap::new(), "missing");
        let error = classify_response(&response, &Method::GET, "https://example.com/x")
            .expect_err("404 should classify as error");
        assert_eq!(error.status(), Some(404));
        assert!(error.to_string().contains("missing"));
    }

    #[test]
    fn transport_failure_keeps_kind() {
        let failure = TransportFailure::new(TransportErrorKind::Timeout, "timed out after 10ms");
        let error = classify_transport_failure(failure, &Method::GET, "https://example.com/");
        assert_eq!(error.code(), ErrorCode::Transport);
        assert_eq!(error.transport_kind(), Some(TransportErrorKind::Timeout));
        assert!(error.is_retry_candidate());
    }
}
