use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use aic_core::{DomainError, RequestId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("request body is not valid JSON: {0}")]
    Json(String),

    #[error("missing required field '{0}'")]
    Missing(&'static str),

    #[error("'{0}' must be a JSON object")]
    NotAnObject(&'static str),

    #[error("'{0}' must be a string")]
    NotAString(&'static str),

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

// -------------------------
// Request DTOs
// -------------------------

/// Validated `POST /generate` body.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    /// Client-supplied id, if any; one is assigned otherwise.
    pub request_id: Option<RequestId>,
    pub parameters: JsonValue,
}

impl GenerateRequest {
    /// Validate a raw body: `{"parameters": {..}, "requestId"?: string}`.
    pub fn from_json(body: JsonValue) -> Result<Self, BodyError> {
        let JsonValue::Object(mut fields) = body else {
            return Err(BodyError::NotAnObject("body"));
        };

        let parameters = fields
            .remove("parameters")
            .ok_or(BodyError::Missing("parameters"))?;
        if !parameters.is_object() {
            return Err(BodyError::NotAnObject("parameters"));
        }

        let request_id = match fields.remove("requestId") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(id)) => Some(RequestId::parse(id)?),
            Some(_) => return Err(BodyError::NotAString("requestId")),
        };

        Ok(Self {
            request_id,
            parameters,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmSignUpRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendCodeRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_parameters_with_and_without_id() {
        let req = GenerateRequest::from_json(json!({"parameters": {"topic": "algebra"}})).unwrap();
        assert_eq!(req.request_id, None);
        assert_eq!(req.parameters["topic"], "algebra");

        let req = GenerateRequest::from_json(json!({"parameters": {}, "requestId": "r-1"})).unwrap();
        assert_eq!(req.request_id.unwrap().as_str(), "r-1");
    }

    #[test]
    fn rejects_malformed_bodies() {
        assert_eq!(
            GenerateRequest::from_json(json!([1, 2])),
            Err(BodyError::NotAnObject("body"))
        );
        assert_eq!(
            GenerateRequest::from_json(json!({"topic": "algebra"})),
            Err(BodyError::Missing("parameters"))
        );
        assert_eq!(
            GenerateRequest::from_json(json!({"parameters": "algebra"})),
            Err(BodyError::NotAnObject("parameters"))
        );
        assert_eq!(
            GenerateRequest::from_json(json!({"parameters": {}, "requestId": 7})),
            Err(BodyError::NotAString("requestId"))
        );
        assert!(matches!(
            GenerateRequest::from_json(json!({"parameters": {}, "requestId": ""})),
            Err(BodyError::Invalid(_))
        ));
    }
}
