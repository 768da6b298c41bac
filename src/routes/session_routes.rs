use axum::extract::State;
use axum::Json;

use crate::error::AppResult;
use crate::types::{InitializeRequest, InitializeResponse};

use super::AppState;

pub async fn initialize(
    State(gateway): State<AppState>,
    Json(req): Json<InitializeRequest>,
) -> AppResult<Json<InitializeResponse>> {
    let response = gateway.initialize(req).await?;
    Ok(Json(response))
}
