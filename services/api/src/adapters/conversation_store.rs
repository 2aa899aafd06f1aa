//! services/api/src/adapters/conversation_store.rs
//!
//! PostgreSQL-backed `ConversationStore`. The step is stored as the JSON form of
//! `ConversationState`, so in-flight flows survive a restart and are shared between instances.

use async_trait::async_trait;
use food_diary_core::conversation::ConversationState;
use food_diary_core::domain::UserId;
use food_diary_core::ports::{ConversationStore, PortError, PortResult};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;

#[derive(Clone)]
pub struct PostgresConversationStore {
    pool: PgPool,
}

impl PostgresConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Decodes a stored step. Rows written by an older build that no longer decode reset to idle.
fn decode_state(user_id: UserId, raw: Value) -> ConversationState {
    match serde_json::from_value(raw) {
        Ok(state) => state,
        Err(e) => {
            warn!("Discarding undecodable conversation state for user {}: {}", user_id, e);
            ConversationState::Idle
        }
    }
}

#[async_trait]
impl ConversationStore for PostgresConversationStore {
    async fn get(&self, user_id: UserId) -> PortResult<ConversationState> {
        let raw: Option<Value> =
            sqlx::query_scalar("SELECT state FROM conversation_states WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(raw
            .map(|raw| decode_state(user_id, raw))
            .unwrap_or_default())
    }

    async fn set(&self, user_id: UserId, state: &ConversationState) -> PortResult<()> {
        if state.is_idle() {
            return self.clear(user_id).await;
        }
        let raw = serde_json::to_value(state).map_err(|e| PortError::Unexpected(e.to_string()))?;
        sqlx::query(
            "INSERT INTO conversation_states (user_id, state, updated_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (user_id) DO UPDATE SET state = EXCLUDED.state, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(&raw)
        .execute(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self, user_id: UserId) -> PortResult<()> {
        sqlx::query("DELETE FROM conversation_states WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
