use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use uuid::Uuid;

use crate::auth::signature::SignatureHeader;
use crate::error::AppError;
use crate::state::SharedState;
use crate::{crypto, db};

/// The API client whose signature was verified for this request.
#[derive(Debug, Clone)]
pub struct AuthClient {
    pub id: Uuid,
    pub name: String,
}

impl FromRequestParts<SharedState> for AuthClient {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthClient>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Missing request signature".to_string()))
    }
}

/// Verify the request signature against the client's access key. The body
/// is buffered because it is part of the signed content.
pub async fn require_signature(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, state.config.max_body_size)
        .await
        .map_err(|_| AppError::BadRequest("Request body too large".to_string()))?;

    let header = parts
        .headers
        .get("x-signature")
        .or_else(|| parts.headers.get(AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing request signature".to_string()))?;
    let signature =
        SignatureHeader::parse(header).map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let client = db::clients::find_by_id(&state.pool, signature.id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Unknown client".to_string()))?;

    let access_key = crypto::decrypt(&client.access_key_enc, &state.config.encryption_key)
        .map_err(|e| AppError::Internal(format!("Cannot read access key of client {}: {e}", client.id)))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    signature
        .verify(
            &access_key,
            parts.method.as_str(),
            path_and_query,
            &bytes,
            Utc::now().timestamp(),
            state.config.signature_max_skew_secs,
        )
        .map_err(|e| {
            tracing::debug!(client_id = %client.id, "Rejected signature: {e}");
            AppError::Unauthorized(e.to_string())
        })?;

    if !client.is_active {
        return Err(AppError::Forbidden("Client is inactive".to_string()));
    }

    parts.extensions.insert(AuthClient {
        id: client.id,
        name: client.name,
    });

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
