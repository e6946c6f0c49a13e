use sqlx::Row;
use uuid::Uuid;

use crate::domain::user::Provider;
use crate::infra::db::Db;

/// Read-only lookup over the user store answering "is this a bookable
/// provider?" and resolving display data for side effects.
#[derive(Clone)]
pub struct ProviderDirectory {
    db: Db,
}

impl ProviderDirectory {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// `None` when the user does not exist or is not flagged as a provider.
    pub async fn find_provider(&self, user_id: Uuid) -> Result<Option<Provider>, sqlx::Error> {
        let row = sqlx::query("SELECT id, name, email FROM users WHERE id = $1 AND is_provider")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|row| Provider {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
        }))
    }

    pub async fn is_provider(&self, user_id: Uuid) -> Result<bool, sqlx::Error> {
        Ok(self.find_provider(user_id).await?.is_some())
    }

    pub async fn display_name(&self, user_id: Uuid) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT name FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await
    }
}
