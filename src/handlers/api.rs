use axum::Json;

use crate::models::ApiMessage;

pub const API_MESSAGE: &str = "An API for use with your Dapp!";

pub async fn api_message() -> Json<ApiMessage> {
    Json(ApiMessage {
        message: API_MESSAGE.to_string(),
    })
}

pub async fn health_check() -> &'static str {
    "OK"
}
