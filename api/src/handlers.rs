use crate::config::RequestSettings;
use crate::provisioner::CredentialProvisioner;
use crate::request_logging::RequestLogging;
use crate::workflow;
use keywrap_common::KeywrapError;
use poem::{
    get, handler,
    http::{header::CONTENT_TYPE, StatusCode},
    web::{Data, Json},
    Endpoint, EndpointExt, Response, Route,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Provisioner shared by all request handlers
pub type SharedProvisioner = Arc<dyn CredentialProvisioner>;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
    pub version: String,
}

/// Routes served by `keywrap-server`
pub fn build_app(provisioner: SharedProvisioner) -> impl Endpoint<Output = Response> {
    Route::new()
        .at("/", get(encrypt_credential).post(encrypt_credential))
        .at("/health", get(health))
        .data(provisioner)
        .with(RequestLogging)
}

#[handler]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "keywrap server is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Mint a key for the configured service account and return it encrypted for
/// the configured recipient as `{"encryptedKey": "..."}`.
#[handler]
pub async fn encrypt_credential(provisioner: Data<&SharedProvisioner>) -> Response {
    let settings = RequestSettings::from_env();
    let result = workflow::generate_and_encrypt(provisioner.0.as_ref(), &settings)
        .await
        .and_then(|response| response.to_json());

    match result {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(body),
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "Credential request failed");
            error_response(&e)
        }
    }
}

fn error_response(err: &KeywrapError) -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(err.to_string())
}
