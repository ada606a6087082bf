use hyper::{Body, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// The canonical failure payload returned on every error surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub kind: String,
    pub api_version: String,
    pub status: String,
    pub message: String,
    pub reason: String,
    pub code: u16,
}

impl Status {
    fn failure(code: StatusCode, reason: &str, message: &str) -> Self {
        Self {
            kind: "Status".to_string(),
            api_version: "v1".to_string(),
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code: code.as_u16(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::failure(StatusCode::UNAUTHORIZED, "Unauthorized", "Unauthorized")
    }

    pub fn forbidden(message: &str) -> Self {
        Self::failure(StatusCode::FORBIDDEN, "Forbidden", message)
    }

    pub fn not_found() -> Self {
        Self::failure(StatusCode::NOT_FOUND, "NotFound", "the server could not find the requested resource")
    }

    pub fn internal(message: &str) -> Self {
        Self::failure(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
    }

    pub fn into_response(self) -> Response<Body> {
        let body = serde_json::to_vec(&self).expect("status payloads always serialize");
        Response::builder()
            .status(self.code)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("status responses are well-formed")
    }
}
