use std::sync::Arc;

use sqlx::PgPool;

use crate::actions::ActionTable;
use crate::config::Config;
use crate::rate_limit::SubmissionRateLimiter;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub actions: ActionTable,
    pub submission_limiter: SubmissionRateLimiter,
}
