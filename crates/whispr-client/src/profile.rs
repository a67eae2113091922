use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;
use whispr_types::api::{Filter, Select, TABLE_BUDDIES, TABLE_USERS};
use whispr_types::models::{User, canonical_timestamp};

use crate::error::{ClientError, Result};
use crate::gateway::{self, Gateway};

/// Mood and presence of a user.
pub struct ProfileService<G> {
    gateway: Arc<G>,
}

impl<G: Gateway> ProfileService<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<User>> {
        gateway::fetch_one(
            &*self.gateway,
            TABLE_USERS,
            Select::new().filter(Filter::eq("id", user_id)),
        )
        .await
    }

    /// Change the user's mood, mirrored onto the buddy rows pointing at them.
    pub async fn set_mood(&self, user_id: Uuid, mood: &str) -> Result<()> {
        let touched = self
            .gateway
            .update(TABLE_USERS, &[Filter::eq("id", user_id)], json!({ "mood": mood }))
            .await?;
        if touched == 0 {
            return Err(ClientError::not_found("user"));
        }
        self.gateway
            .update(TABLE_BUDDIES, &[Filter::eq("buddy_user_id", user_id)], json!({ "mood": mood }))
            .await?;
        Ok(())
    }

    /// Stamp presence and mirror it onto every buddy row pointing at the user.
    pub async fn set_online(&self, user_id: Uuid, online: bool) -> Result<()> {
        let patch = json!({
            "online": online,
            "last_seen": canonical_timestamp(&Utc::now()),
        });
        let touched = self
            .gateway
            .update(TABLE_USERS, &[Filter::eq("id", user_id)], patch)
            .await?;
        if touched == 0 {
            return Err(ClientError::not_found("user"));
        }

        let mirrored = self
            .gateway
            .update(
                TABLE_BUDDIES,
                &[Filter::eq("buddy_user_id", user_id)],
                json!({ "is_online": online }),
            )
            .await?;
        debug!(%user_id, online, mirrored, "presence updated");
        Ok(())
    }
}
