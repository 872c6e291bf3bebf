//! Response envelope shared by the API routes

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::types::CaError;

/// Coded entry in `errors` or `messages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub code: u32,
    pub message: String,
}

impl From<&CaError> for ResponseMessage {
    fn from(err: &CaError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// `{success, result, errors, messages}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub errors: Vec<ResponseMessage>,
    pub messages: Vec<ResponseMessage>,
}

impl Envelope {
    pub fn success(result: impl Serialize) -> Self {
        let result = serde_json::to_value(result).unwrap_or(serde_json::Value::Null);
        Self {
            success: true,
            result: Some(result),
            errors: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn failure(err: &CaError) -> Self {
        Self {
            success: false,
            result: None,
            errors: vec![err.into()],
            messages: Vec::new(),
        }
    }

    /// Attach a non-fatal side condition
    pub fn with_message(mut self, err: &CaError) -> Self {
        self.messages.push(err.into());
        self
    }
}

/// Serialize a value as a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Envelope response carrying one error
pub fn error_response(err: &CaError) -> Response<Full<Bytes>> {
    json_response(err.status_code(), &Envelope::failure(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_shape() {
        let env = Envelope::failure(&CaError::Unauthorized("nope".into()));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["result"].is_null());
        assert_eq!(json["errors"][0]["code"], 7100);
        assert_eq!(json["messages"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_success_with_message() {
        let env = Envelope::success(serde_json::json!({"certificate": "PEM"}))
            .with_message(&CaError::Persistence("disk full".into()));
        assert!(env.success);
        assert!(env.errors.is_empty());
        assert_eq!(env.messages[0].code, 8000);
        assert_eq!(env.result.unwrap()["certificate"], "PEM");
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&CaError::UnknownLabel("x".into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
