use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use whispr_api::auth::AppState;

/// Background task that moves overdue notes to `expired`.
///
/// Ticks every `interval_secs` until `shutdown` fires. Failures are logged
/// and the next tick tries again.
pub async fn run_expiry_loop(state: AppState, interval_secs: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match sweep_once(&state).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: expired {} notes", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {}", e);
            }
        }
    }
}

pub async fn sweep_once(state: &AppState) -> anyhow::Result<usize> {
    let state = state.clone();
    let count = tokio::task::spawn_blocking(move || state.db.expire_notes(Utc::now())).await??;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration as ChronoDuration;
    use whispr_api::auth::AppStateInner;
    use whispr_db::Database;

    use super::*;

    #[tokio::test]
    async fn sweep_expires_overdue_notes() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_account("a@example.com", "hash", None).unwrap();
        let past = (Utc::now() - ChronoDuration::minutes(1)).to_rfc3339();
        db.insert_rows(
            "whispr_notes",
            &serde_json::json!({
                "sender_id": user.id, "content": "gone", "mood": "calm", "expires_at": past
            }),
        )
        .unwrap();

        let state = Arc::new(AppStateInner { db, jwt_secret: "s".into() });
        assert_eq!(sweep_once(&state).await.unwrap(), 1);
        assert_eq!(sweep_once(&state).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let state = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "s".into(),
        });
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_expiry_loop(state, 1, shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
