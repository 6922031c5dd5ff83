use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub access_key_enc: Vec<u8>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
