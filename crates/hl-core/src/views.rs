use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;

/// Public identity attached to posts, comments, messages and notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl UserSummary {
    /// Reads `<prefix>id`, `<prefix>username` and `<prefix>avatar_url` from a joined row.
    pub fn from_row(row: &PgRow, prefix: &str) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get(format!("{prefix}id").as_str())?,
            username: row.try_get(format!("{prefix}username").as_str())?,
            avatar_url: row.try_get(format!("{prefix}avatar_url").as_str())?,
        })
    }
}
