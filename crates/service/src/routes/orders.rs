//! Order route handlers.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Return one order as pretty-printed JSON.
pub async fn show(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> Result<Response> {
    let order = state.lookup().lookup(&order_uid).await?;

    let body = serde_json::to_string_pretty(order.as_ref())
        .map_err(|e| AppError::Internal(format!("failed to encode order: {e}")))?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
