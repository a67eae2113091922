//! Resolving a note: listen turns the sender into a buddy, reject just consumes it.
//!
//! The whole transition is one `handle_note_propagation` call so the store can
//! flip the note and create the buddy pair atomically. Losing a race shows up
//! as [`ClientError::Conflict`](crate::error::ClientError::Conflict); callers refetch candidates and buddies either way.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;
use whispr_types::api::{NotePropagationParams, PropagationOutcome, procedures};
use whispr_types::models::NoteAction;

use crate::error::Result;
use crate::gateway::{self, Gateway};

pub const ALREADY_RESOLVED: &str = "note already resolved";

pub struct NotePropagation<G> {
    gateway: Arc<G>,
}

impl<G: Gateway> NotePropagation<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    pub async fn respond(
        &self,
        note_id: Uuid,
        responder_id: Uuid,
        action: NoteAction,
    ) -> Result<PropagationOutcome> {
        let params = NotePropagationParams {
            note_id,
            responder_id,
            action,
        };

        match gateway::invoke(&*self.gateway, procedures::HANDLE_NOTE_PROPAGATION, &params).await {
            Ok(outcome) => {
                info!(%note_id, %responder_id, %action, "note resolved");
                Ok(outcome)
            }
            Err(e) => {
                let e = e.into_conflict(ALREADY_RESOLVED);
                if e.is_conflict() {
                    debug!(%note_id, "lost the race for note");
                }
                Err(e)
            }
        }
    }

    pub async fn listen(&self, note_id: Uuid, responder_id: Uuid) -> Result<PropagationOutcome> {
        self.respond(note_id, responder_id, NoteAction::Listen).await
    }

    pub async fn reject(&self, note_id: Uuid, responder_id: Uuid) -> Result<PropagationOutcome> {
        self.respond(note_id, responder_id, NoteAction::Reject).await
    }
}

