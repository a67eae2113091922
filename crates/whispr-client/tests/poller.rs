mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{TestGateway, manual_config, post, send};
use tokio::sync::mpsc::UnboundedReceiver;
use whispr_client::ClientConfig;
use whispr_client::notify::ChannelNotifier;
use whispr_client::poller::{NotificationPoller, TickOutcome};
use whispr_client::propagation::NotePropagation;
use whispr_types::events::{Notification, NotificationKind};
use whispr_types::models::User;

type Poller = NotificationPoller<TestGateway, ChannelNotifier>;

fn poller_for(gw: &Arc<TestGateway>, user: &User) -> (Poller, UnboundedReceiver<Notification>) {
    let (notifier, rx) = ChannelNotifier::new();
    let poller = NotificationPoller::new(gw.clone(), Arc::new(notifier), user.id, manual_config());
    (poller, rx)
}

fn poller_with_history(
    gw: &Arc<TestGateway>,
    user: &User,
    known_id_history: usize,
) -> (Poller, UnboundedReceiver<Notification>) {
    let (notifier, rx) = ChannelNotifier::new();
    let config = ClientConfig {
        known_id_history,
        ..manual_config()
    };
    let poller = NotificationPoller::new(gw.clone(), Arc::new(notifier), user.id, config);
    (poller, rx)
}

fn bodies(notifications: &[Notification]) -> Vec<&str> {
    notifications.iter().map(|n| n.body.as_str()).collect()
}

fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

#[tokio::test]
async fn each_new_note_is_announced_once() {
    let gw = TestGateway::new();
    let poster = gw.user("poster@example.com", "sad");
    let viewer = gw.user("viewer@example.com", "calm");
    let (poller, mut rx) = poller_for(&gw, &viewer);
    poller.start().await;

    post(&*gw, &poster, "one").await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 0 });

    post(&*gw, &poster, "two").await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 1 });
    post(&*gw, &poster, "three").await;
    post(&*gw, &viewer, "mine").await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 1 });
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 0 });

    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|n| n.kind == NotificationKind::Note));
    assert_eq!(seen[0].title, "A sad whisper is waiting");
    assert_eq!(seen[0].body, "two");
    assert_eq!(seen[1].body, "three");
    let ids: HashSet<_> = seen.iter().map(|n| n.metadata["note_id"].clone()).collect();
    assert_eq!(ids.len(), 2);

    poller.stop().await;
}

#[tokio::test]
async fn messages_from_the_other_side_are_announced() {
    let gw = TestGateway::new();
    let alice = gw.user("alice@example.com", "calm");
    let bob = gw.user("bob@example.com", "calm");
    let note = post(&*gw, &alice, "hi").await;
    let outcome = NotePropagation::new(gw.clone()).listen(note.id, bob.id).await.unwrap();
    let alice_row = outcome.counterpart_buddy_id.unwrap();
    let bob_row = outcome.buddy_id.unwrap();

    let (poller, mut rx) = poller_for(&gw, &bob);
    poller.start().await;
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 0 });

    send(&*gw, alice_row, &alice, "are you there?").await;
    send(&*gw, bob_row, &bob, "yes").await;
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 1 });
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 0 });

    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, NotificationKind::Message);
    assert_eq!(seen[0].title, alice.anonymous_id);
    assert_eq!(seen[0].body, "are you there?");
    assert_eq!(seen[0].metadata["buddy_id"], serde_json::json!(bob_row));

    poller.stop().await;
}

#[tokio::test]
async fn buddy_gained_after_priming_is_watched() {
    let gw = TestGateway::new();
    let bob = gw.user("bob@example.com", "calm");
    let carol = gw.user("carol@example.com", "calm");
    let (poller, mut rx) = poller_for(&gw, &bob);
    poller.start().await;
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 0 });

    let note = post(&*gw, &carol, "lonely").await;
    let outcome = NotePropagation::new(gw.clone()).listen(note.id, bob.id).await.unwrap();
    send(&*gw, outcome.counterpart_buddy_id.unwrap(), &carol, "thanks for listening").await;

    // the seeded note message is already read and stays quiet
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 1 });
    assert_eq!(drain(&mut rx)[0].body, "thanks for listening");

    poller.stop().await;
}

#[tokio::test]
async fn offline_ticks_are_skipped_and_checks_throttled() {
    let gw = TestGateway::new();
    let viewer = gw.user("viewer@example.com", "calm");
    let (poller, _rx) = poller_for(&gw, &viewer);
    poller.start().await;

    gw.set_failing(true);
    assert_eq!(poller.tick_notes().await, TickOutcome::Offline);
    assert_eq!(poller.tick_messages().await, TickOutcome::Offline);
    assert_eq!(gw.health_checks(), 1);

    poller.stop().await;
}

#[tokio::test]
async fn failed_fetch_leaves_history_alone_and_marks_offline() {
    let gw = TestGateway::new();
    let poster = gw.user("poster@example.com", "calm");
    let viewer = gw.user("viewer@example.com", "calm");
    let (poller, mut rx) = poller_for(&gw, &viewer);
    poller.start().await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 0 });

    gw.set_failing(true);
    assert_eq!(poller.tick_notes().await, TickOutcome::Failed);
    assert_eq!(poller.tick_notes().await, TickOutcome::Offline);
    assert_eq!(gw.health_checks(), 1);

    // coming back restarts the poller, which primes again
    gw.set_failing(false);
    post(&*gw, &poster, "while away").await;
    poller.start().await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 0 });
    assert!(drain(&mut rx).is_empty());

    poller.stop().await;
}

#[tokio::test]
async fn stop_silences_a_tick_already_in_flight() {
    let gw = TestGateway::new();
    let poster = gw.user("poster@example.com", "calm");
    let viewer = gw.user("viewer@example.com", "calm");
    let (poller, mut rx) = poller_for(&gw, &viewer);
    let poller = Arc::new(poller);
    poller.start().await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 0 });

    post(&*gw, &poster, "late").await;
    gw.set_gated(true);
    let in_flight = tokio::spawn({
        let poller = poller.clone();
        async move { poller.tick_notes().await }
    });
    gw.entered.notified().await;

    poller.stop().await;
    gw.set_gated(false);
    gw.release.notify_one();

    assert_eq!(in_flight.await.unwrap(), TickOutcome::Stopped);
    assert!(drain(&mut rx).is_empty());
    assert!(!poller.is_polling().await);
    assert_eq!(poller.tick_notes().await, TickOutcome::Stopped);
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let gw = TestGateway::new();
    let viewer = gw.user("viewer@example.com", "calm");
    let (poller, _rx) = poller_for(&gw, &viewer);
    let poller = Arc::new(poller);
    poller.start().await;

    gw.set_gated(true);
    let first = tokio::spawn({
        let poller = poller.clone();
        async move { poller.tick_notes().await }
    });
    gw.entered.notified().await;

    assert_eq!(poller.tick_notes().await, TickOutcome::Skipped);
    gw.set_gated(false);
    gw.release.notify_one();
    assert_eq!(first.await.unwrap(), TickOutcome::Completed { emitted: 0 });

    poller.stop().await;
}

#[tokio::test]
async fn restart_forgets_known_ids() {
    let gw = TestGateway::new();
    let poster = gw.user("poster@example.com", "calm");
    let viewer = gw.user("viewer@example.com", "calm");
    let (poller, mut rx) = poller_for(&gw, &viewer);

    poller.start().await;
    assert!(poller.is_polling().await);
    post(&*gw, &poster, "first").await;
    poller.tick_notes().await;

    poller.stop().await;
    post(&*gw, &poster, "missed").await;
    poller.start().await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 0 });
    post(&*gw, &poster, "fresh").await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 1 });

    let seen = drain(&mut rx);
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].body, "fresh");

    poller.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let gw = TestGateway::new();
    let viewer = gw.user("viewer@example.com", "calm");
    let (poller, _rx) = poller_for(&gw, &viewer);

    poller.stop().await;
    poller.start().await;
    poller.stop().await;
    poller.stop().await;
    assert!(!poller.is_polling().await);
    assert_eq!(poller.tick_messages().await, TickOutcome::Stopped);
}

#[tokio::test]
async fn timer_drives_ticks() {
    let gw = TestGateway::new();
    let poster = gw.user("poster@example.com", "calm");
    let viewer = gw.user("viewer@example.com", "calm");
    let (notifier, mut rx) = ChannelNotifier::new();
    let mut config = manual_config();
    config.note_poll_interval = Duration::from_millis(50);
    let poller = NotificationPoller::new(gw.clone(), Arc::new(notifier), viewer.id, config);
    poller.start().await;

    // let the first timer tick prime
    tokio::time::sleep(Duration::from_millis(200)).await;
    post(&*gw, &poster, "tick tock").await;

    let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.body, "tick tock");
    poller.stop().await;
}

#[tokio::test]
async fn note_sliding_back_into_a_capped_window_is_not_announced_again() {
    let gw = TestGateway::new();
    let poster = gw.user("poster@example.com", "calm");
    let viewer = gw.user("viewer@example.com", "calm");
    let other = gw.user("other@example.com", "calm");
    let (poller, mut rx) = poller_with_history(&gw, &viewer, 3);
    poller.start().await;

    post(&*gw, &poster, "A").await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 0 });

    post(&*gw, &poster, "B").await;
    post(&*gw, &poster, "C").await;
    let d = post(&*gw, &poster, "D").await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 3 });

    // consuming D pulls A back into the three newest active notes
    NotePropagation::new(gw.clone()).reject(d.id, other.id).await.unwrap();
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 0 });

    post(&*gw, &poster, "E").await;
    assert_eq!(poller.tick_notes().await, TickOutcome::Completed { emitted: 1 });
    assert_eq!(bodies(&drain(&mut rx)), vec!["B", "C", "D", "E"]);

    poller.stop().await;
}

#[tokio::test]
async fn message_burst_larger_than_the_history_is_announced_once() {
    let gw = TestGateway::new();
    let alice = gw.user("alice@example.com", "calm");
    let bob = gw.user("bob@example.com", "calm");
    let note = post(&*gw, &alice, "hi").await;
    let outcome = NotePropagation::new(gw.clone()).listen(note.id, bob.id).await.unwrap();
    let alice_row = outcome.counterpart_buddy_id.unwrap();

    let (poller, mut rx) = poller_with_history(&gw, &bob, 3);
    poller.start().await;
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 0 });

    for i in 0..5 {
        send(&*gw, alice_row, &alice, &format!("m{}", i)).await;
    }
    // only the newest three fit the window
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 3 });
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 0 });

    send(&*gw, alice_row, &alice, "m5").await;
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 1 });
    assert_eq!(poller.tick_messages().await, TickOutcome::Completed { emitted: 0 });

    assert_eq!(bodies(&drain(&mut rx)), vec!["m2", "m3", "m4", "m5"]);
    poller.stop().await;
}
