//! Buddy directory for one signed-in user.
//!
//! Keeps the last list the store returned so a failed refresh never blanks the
//! screen, and runs pin toggles optimistically through [`Speculative`].

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;
use whispr_types::api::{
    Affected, BuddyActionParams, Filter, Order, PinState, Select, TABLE_BUDDIES, procedures,
};
use whispr_types::models::Buddy;

use crate::error::{ClientError, Result};
use crate::gateway::{self, Gateway};
use crate::speculative::Speculative;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuddyFilter {
    #[default]
    All,
    Unread,
    Pinned,
    Online,
}

impl BuddyFilter {
    pub fn matches(&self, buddy: &Buddy) -> bool {
        match self {
            Self::All => true,
            Self::Unread => buddy.unread_count > 0,
            Self::Pinned => buddy.is_pinned,
            Self::Online => buddy.is_online,
        }
    }
}

/// Buddies passing `filter` whose name or initials contain `search`, ignoring case.
pub fn filter_buddies(buddies: &[Buddy], filter: BuddyFilter, search: &str) -> Vec<Buddy> {
    let needle = search.trim().to_lowercase();
    buddies
        .iter()
        .filter(|b| filter.matches(b))
        .filter(|b| {
            needle.is_empty()
                || b.name.to_lowercase().contains(&needle)
                || b.initials.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect()
}

pub struct BuddyDirectory<G> {
    gateway: Arc<G>,
    user_id: Uuid,
    buddies: Speculative<Vec<Buddy>>,
}

impl<G: Gateway> BuddyDirectory<G> {
    pub fn new(gateway: Arc<G>, user_id: Uuid) -> Self {
        Self {
            gateway,
            user_id,
            buddies: Speculative::default(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Fetch the user's buddies, most recently updated first. On failure the
    /// previous list stays available through [`BuddyDirectory::cached`].
    pub async fn list(&self) -> Result<Vec<Buddy>> {
        let select = Select::new()
            .filter(Filter::eq("user_id", self.user_id))
            .order(Order::desc("updated_at"));

        match gateway::fetch::<Buddy, _>(&*self.gateway, TABLE_BUDDIES, &select).await {
            Ok(buddies) => {
                self.buddies.replace(buddies.clone());
                Ok(buddies)
            }
            Err(e) => {
                warn!(user_id = %self.user_id, "buddy refresh failed, keeping last list: {}", e);
                Err(e)
            }
        }
    }

    /// Last list the store returned, with any pending optimistic changes.
    pub fn cached(&self) -> Vec<Buddy> {
        self.buddies.view()
    }

    pub fn visible(&self, filter: BuddyFilter, search: &str) -> Vec<Buddy> {
        self.buddies.with(|buddies| filter_buddies(buddies, filter, search))
    }

    pub async fn get(&self, buddy_id: Uuid) -> Result<Option<Buddy>> {
        gateway::fetch_one(
            &*self.gateway,
            TABLE_BUDDIES,
            Select::new().filter(Filter::eq("id", buddy_id)),
        )
        .await
    }

    /// Flip the pin locally at once, confirm with the store, revert on failure.
    pub async fn toggle_pin(&self, buddy_id: Uuid) -> Result<PinState> {
        let params = BuddyActionParams {
            buddy_id,
            user_id: self.user_id,
        };
        let flip = |buddies: &mut Vec<Buddy>| {
            if let Some(buddy) = buddies.iter_mut().find(|b| b.id == buddy_id) {
                buddy.is_pinned = !buddy.is_pinned;
            }
        };

        let state: PinState = self
            .buddies
            .apply(
                flip,
                flip,
                gateway::invoke(&*self.gateway, procedures::TOGGLE_BUDDY_PIN, &params),
            )
            .await?;

        // the store's answer wins over whatever the local flip produced
        self.buddies.with(|buddies| {
            if let Some(buddy) = buddies.iter_mut().find(|b| b.id == buddy_id) {
                buddy.is_pinned = state.is_pinned;
            }
        });
        debug!(%buddy_id, pinned = state.is_pinned, "pin toggled");
        Ok(state)
    }

    /// Delete the conversation. The buddy row stays with an empty preview.
    pub async fn clear_history(&self, buddy_id: Uuid) -> Result<usize> {
        let affected: Affected =
            gateway::invoke(&*self.gateway, procedures::CLEAR_CHAT_HISTORY, &self.params(buddy_id)).await?;
        self.buddies.with(|buddies| {
            if let Some(buddy) = buddies.iter_mut().find(|b| b.id == buddy_id) {
                buddy.last_message = None;
                buddy.last_message_time = None;
                buddy.unread_count = 0;
            }
        });
        Ok(affected.affected)
    }

    /// Zero the unread counter and mark the other side's messages read.
    pub async fn mark_read(&self, buddy_id: Uuid) -> Result<usize> {
        let affected: Affected =
            gateway::invoke(&*self.gateway, procedures::MARK_BUDDY_MESSAGES_READ, &self.params(buddy_id))
                .await?;
        self.buddies.with(|buddies| {
            if let Some(buddy) = buddies.iter_mut().find(|b| b.id == buddy_id) {
                buddy.unread_count = 0;
            }
        });
        Ok(affected.affected)
    }

    pub async fn block(&self, buddy_id: Uuid) -> Result<()> {
        let _: Affected =
            gateway::invoke(&*self.gateway, procedures::BLOCK_USER, &self.params(buddy_id)).await?;
        self.list().await.map(|_| ())
    }

    fn params(&self, buddy_id: Uuid) -> BuddyActionParams {
        BuddyActionParams {
            buddy_id,
            user_id: self.user_id,
        }
    }
}

/// Resolve a buddy row or report it missing.
pub(crate) async fn require_buddy<G: Gateway + ?Sized>(gateway: &G, buddy_id: Uuid) -> Result<Buddy> {
    gateway::fetch_one(
        gateway,
        TABLE_BUDDIES,
        Select::new().filter(Filter::eq("id", buddy_id)),
    )
    .await?
    .ok_or_else(|| ClientError::not_found("buddy"))
}
