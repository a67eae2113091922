//! Operational tooling: account removal, note purges, notification smoke test.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;
use whispr_types::api::{Affected, Filter, PurgeParams, TABLE_NOTES, UserParams, procedures};
use whispr_types::events::{Notification, NotificationKind};

use crate::error::Result;
use crate::gateway::{self, Gateway};
use crate::notify::Notifier;

pub struct AdminTools<G> {
    gateway: Arc<G>,
}

impl<G: Gateway> AdminTools<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Remove the user with their notes, buddies on both sides and conversations.
    pub async fn delete_account(&self, user_id: Uuid) -> Result<usize> {
        let affected: Affected = gateway::invoke(
            &*self.gateway,
            procedures::DELETE_USER_ACCOUNT,
            &UserParams { user_id },
        )
        .await?;
        info!(%user_id, rows = affected.affected, "account deleted");
        Ok(affected.affected)
    }

    /// Drop resolved notes untouched for at least `older_than_hours`.
    pub async fn purge_resolved(&self, older_than_hours: i64) -> Result<usize> {
        let affected: Affected = gateway::invoke(
            &*self.gateway,
            procedures::PURGE_RESOLVED_NOTES,
            &PurgeParams { older_than_hours },
        )
        .await?;
        Ok(affected.affected)
    }

    /// Drop every note a sender ever posted, e.g. seeded test data.
    pub async fn purge_sender_notes(&self, sender_id: Uuid) -> Result<usize> {
        let deleted = self
            .gateway
            .delete(TABLE_NOTES, &[Filter::eq("sender_id", sender_id)])
            .await?;
        info!(%sender_id, deleted, "sender notes purged");
        Ok(deleted)
    }

    /// Run `expire_notes` now instead of waiting for the server sweep.
    pub async fn expire_now(&self) -> Result<usize> {
        let affected: Affected =
            gateway::invoke(&*self.gateway, procedures::EXPIRE_NOTES, &serde_json::json!({})).await?;
        Ok(affected.affected)
    }
}

pub fn send_test_notification(notifier: &impl Notifier) {
    notifier.notify(
        Notification::new(NotificationKind::General, "Whispr", "Notifications are working")
            .with_metadata(serde_json::json!({ "test": true })),
    );
}
