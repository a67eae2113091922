#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;
use whispr_client::error::{ClientError, Result};
use whispr_client::{ClientConfig, Gateway, LocalGateway};
use whispr_types::api::{Filter, Select};
use whispr_types::models::{BuddyMessage, MessageType, User, WhisprNote};

/// Gateway wrapper that can simulate an outage or hold queries until released.
pub struct TestGateway {
    pub inner: LocalGateway,
    failing: AtomicBool,
    gated: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
    pub health_checks: AtomicUsize,
}

impl TestGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalGateway::in_memory().unwrap(),
            failing: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
            health_checks: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_gated(&self, gated: bool) {
        self.gated.store(gated, Ordering::SeqCst);
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ClientError::Transport("injected outage".into()))
        } else {
            Ok(())
        }
    }

    async fn wait_for_release(&self) {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    pub fn user(&self, email: &str, mood: &str) -> User {
        self.inner
            .database()
            .create_account(email, "not-a-real-hash", Some(mood))
            .unwrap()
    }
}

impl Gateway for TestGateway {
    async fn query(&self, table: &str, select: &Select) -> Result<Vec<Value>> {
        self.check()?;
        self.wait_for_release().await;
        self.inner.query(table, select).await
    }

    async fn insert(&self, table: &str, rows: Value) -> Result<Vec<Value>> {
        self.check()?;
        self.inner.insert(table, rows).await
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<usize> {
        self.check()?;
        self.inner.update(table, filters, patch).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize> {
        self.check()?;
        self.inner.delete(table, filters).await
    }

    async fn call(&self, procedure: &str, params: Value) -> Result<Value> {
        self.check()?;
        self.inner.call(procedure, params).await
    }

    async fn health(&self) -> Result<()> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.check()
    }
}

/// Config for tests that drive ticks by hand.
pub fn manual_config() -> ClientConfig {
    ClientConfig {
        message_poll_interval: Duration::from_secs(3600),
        note_poll_interval: Duration::from_secs(3600),
        ..ClientConfig::default()
    }
}

pub async fn post(gateway: &impl Gateway, sender: &User, content: &str) -> WhisprNote {
    let rows = gateway
        .insert(
            whispr_types::api::TABLE_NOTES,
            serde_json::json!({ "sender_id": sender.id, "content": content, "mood": sender.mood }),
        )
        .await
        .unwrap();
    serde_json::from_value(rows[0].clone()).unwrap()
}

/// Send a text message through the procedure, bypassing the messaging channel.
pub async fn send(gateway: &impl Gateway, buddy_id: Uuid, sender: &User, content: &str) -> BuddyMessage {
    let params = serde_json::json!({
        "buddy_id": buddy_id,
        "sender_id": sender.id,
        "content": content,
        "message_type": MessageType::Text,
    });
    let value = gateway
        .call(whispr_types::api::procedures::SEND_BUDDY_MESSAGE, params)
        .await
        .unwrap();
    serde_json::from_value(value).unwrap()
}
