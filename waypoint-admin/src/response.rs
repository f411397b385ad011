//! JSON response helpers.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Message of the error responder when the caller supplied none.
pub const DEFAULT_ERROR_MESSAGE: &str = "Service list is empty or no service instance is responding.";

#[derive(Serialize)]
struct StatusBody<'a> {
    status: u16,
    message: &'a str,
}

/// Serializes `value` as the response body.
pub fn json_response<T: Serialize + ?Sized>(
    status: StatusCode,
    value: &T,
) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(_) => {
            let mut response = Response::new(Full::new(Bytes::from_static(
                b"Internal server error, unable to parse json response",
            )));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// `{"status": <code>, "message": <message>}` with the matching status.
pub fn status_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(
        status,
        &StatusBody {
            status: status.as_u16(),
            message,
        },
    )
}

/// The canonical 502 answer for requests that could not be routed.
pub fn error_response(message: Option<&str>) -> Response<Full<Bytes>> {
    let message = message.filter(|m| !m.is_empty()).unwrap_or(DEFAULT_ERROR_MESSAGE);
    status_response(StatusCode::BAD_GATEWAY, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_response_shape() {
        let response = status_response(StatusCode::PRECONDITION_FAILED, "Missing address");
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"status": 412, "message": "Missing address"})
        );
    }

    #[tokio::test]
    async fn test_error_response_defaults_message() {
        for message in [None, Some("")] {
            let response = error_response(message);
            assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
            assert_eq!(
                body_json(response).await,
                serde_json::json!({"status": 502, "message": DEFAULT_ERROR_MESSAGE})
            );
        }

        let response = error_response(Some("Requested redirection does not exist: /x"));
        assert_eq!(
            body_json(response).await["message"],
            "Requested redirection does not exist: /x"
        );
    }
}
