use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};

use crate::actions::FieldError;
use crate::auth::AuthClient;
use crate::db;
use crate::error::AppError;
use crate::state::SharedState;
use crate::submission::{bulk, pipeline};

fn parse_json(body: &Bytes) -> Result<Value, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid JSON: {e}")))
}

/// `data` and `meta` must both be objects.
fn split_envelope(body: Value) -> Result<(Value, Value), AppError> {
    let Value::Object(mut envelope) = body else {
        return Err(AppError::BadRequest("Expected a JSON object".to_string()));
    };

    let mut errors = Vec::new();
    let mut take = |key: &str| match envelope.remove(key) {
        Some(value @ Value::Object(_)) => value,
        Some(_) => {
            errors.push(FieldError::new(key, "Expected a dictionary of items."));
            Value::Null
        }
        None => {
            errors.push(FieldError::new(key, "This field is required."));
            Value::Null
        }
    };
    let data = take("data");
    let meta = take("meta");

    if errors.is_empty() {
        Ok((data, meta))
    } else {
        Err(AppError::Validation(errors))
    }
}

pub async fn create(
    client: AuthClient,
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let (data, meta) = split_envelope(parse_json(&body)?)?;

    let submission = pipeline::run(&state, Some(client.id), data, meta).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "data": submission.data,
            "meta": submission.meta,
        })),
    ))
}

pub async fn create_bulk_notify_email(
    client: AuthClient,
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let body = parse_json(&body)?;
    let envelope = bulk::BulkEnvelope::parse(&body).map_err(AppError::Validation)?;

    bulk::run(&state, Some(client.id), &envelope).await?;

    let mut echo = json!({
        "template_id": envelope.template_id,
        "bulk_email_entries": body["bulk_email_entries"],
    });
    if let Some(reply_to) = &envelope.email_reply_to_id {
        echo["email_reply_to_id"] = json!(reply_to);
    }
    Ok((StatusCode::CREATED, Json(echo)))
}

/// Always 204, whether or not anything matched.
pub async fn delete_by_sender(
    client: AuthClient,
    State(state): State<SharedState>,
    Path(email_address): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = db::submissions::delete_by_sender_email(&state.pool, &email_address).await?;
    tracing::info!(client = %client.name, deleted, "Deleted submissions by sender");
    Ok(StatusCode::NO_CONTENT)
}
