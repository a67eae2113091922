//! Note repository: which active notes a viewer gets to see, and in what order.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;
use whispr_types::api::{Filter, Order, Select, TABLE_BUDDIES, TABLE_NOTES};
use whispr_types::models::{NoteStatus, User, WhisprNote, canonical_timestamp};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::gateway::{self, Gateway};

pub const MOOD_MATCH_BONUS: f64 = 10.0;
pub const FRESH_BONUS: f64 = 5.0;
pub const PROPAGATION_CEILING: f64 = 10.0;
/// Upper bound of the random score added for variety.
pub const JITTER: f64 = 3.0;

pub struct NoteRepository<G> {
    gateway: Arc<G>,
    config: ClientConfig,
}

impl<G: Gateway> NoteRepository<G> {
    pub fn new(gateway: Arc<G>, config: ClientConfig) -> Self {
        Self { gateway, config }
    }

    /// Active notes from anyone but the viewer, newest first.
    pub async fn get_candidate_notes(&self, viewer_id: Uuid, limit: usize) -> Result<Vec<WhisprNote>> {
        gateway::fetch(&*self.gateway, TABLE_NOTES, &candidate_query(viewer_id, limit)).await
    }

    /// Same query with the small cap used for viewers without a social graph yet.
    pub async fn get_cold_start_notes(&self, viewer_id: Uuid, small_limit: usize) -> Result<Vec<WhisprNote>> {
        self.get_candidate_notes(viewer_id, small_limit).await
    }

    pub async fn buddy_count(&self, user_id: Uuid) -> Result<usize> {
        let select = Select::new().filter(Filter::eq("user_id", user_id));
        Ok(self.gateway.query(TABLE_BUDDIES, &select).await?.len())
    }

    /// Pick the cold-start or full policy from the viewer's buddy count,
    /// then rank for the viewer's current mood.
    pub async fn candidates_for(&self, viewer: &User) -> Result<Vec<WhisprNote>> {
        let buddies = self.buddy_count(viewer.id).await?;
        let notes = if buddies <= self.config.cold_start_buddy_threshold {
            debug!(viewer = %viewer.id, buddies, "cold-start note policy");
            self.get_cold_start_notes(viewer.id, self.config.cold_start_limit).await?
        } else {
            self.get_candidate_notes(viewer.id, self.config.candidate_limit).await?
        };

        let mut rng = rand::rng();
        Ok(rank_notes(notes, &viewer.mood, Utc::now(), || rng.random_range(0.0..JITTER)))
    }

    /// Publish a new active note. `ttl` sets `expires_at`.
    pub async fn post_note(
        &self,
        sender_id: Uuid,
        content: &str,
        mood: &str,
        ttl: Option<Duration>,
    ) -> Result<WhisprNote> {
        let expires_at = ttl.map(|ttl| canonical_timestamp(&(Utc::now() + ttl)));
        let row = json!({
            "sender_id": sender_id,
            "content": content,
            "mood": mood,
            "status": NoteStatus::Active,
            "expires_at": expires_at,
        });
        gateway::create(&*self.gateway, TABLE_NOTES, &row)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::not_found("note"))
    }

    /// The viewer's own notes, newest first.
    pub async fn sent_by(&self, sender_id: Uuid) -> Result<Vec<WhisprNote>> {
        let select = Select::new()
            .filter(Filter::eq("sender_id", sender_id))
            .order(Order::desc("created_at"));
        gateway::fetch(&*self.gateway, TABLE_NOTES, &select).await
    }
}

pub fn candidate_query(viewer_id: Uuid, limit: usize) -> Select {
    Select::new()
        .filter(Filter::eq("status", NoteStatus::Active))
        .filter(Filter::eq("is_active", true))
        .filter(Filter::neq("sender_id", viewer_id))
        .order(Order::desc("created_at"))
        .limit(limit)
}

/// Priority of a note for a viewer, before jitter.
pub fn score(note: &WhisprNote, viewer_mood: &str, now: DateTime<Utc>) -> f64 {
    let mut score = 0.0;
    if note.mood.eq_ignore_ascii_case(viewer_mood) {
        score += MOOD_MATCH_BONUS;
    }
    if now - note.created_at < Duration::hours(1) {
        score += FRESH_BONUS;
    }
    score + (PROPAGATION_CEILING - note.propagation_count as f64).max(0.0)
}

/// Highest score first, newer first on ties.
pub fn rank_notes(
    notes: Vec<WhisprNote>,
    viewer_mood: &str,
    now: DateTime<Utc>,
    mut jitter: impl FnMut() -> f64,
) -> Vec<WhisprNote> {
    let mut scored: Vec<(f64, WhisprNote)> = notes
        .into_iter()
        .map(|note| (score(&note, viewer_mood, now) + jitter(), note))
        .collect();
    scored.sort_by(|(a, na), (b, nb)| {
        b.partial_cmp(a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| nb.created_at.cmp(&na.created_at))
    });
    scored.into_iter().map(|(_, note)| note).collect()
}
