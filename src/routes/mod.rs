pub mod submissions;

use axum::Router;
use axum::routing::{delete, post};

use crate::state::SharedState;

/// Client-facing API. Every route here requires a request signature.
pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/submission", post(submissions::create))
        .route("/v2/bulk-notify-email", post(submissions::create_bulk_notify_email))
        .route(
            "/delete-submissions/{email_address}",
            delete(submissions::delete_by_sender),
        )
}
