use tokio::sync::mpsc;
use tracing::{info, warn};
use whispr_types::events::Notification;

/// Where notification intents go. Rendering is the receiver's business.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards intents to a channel, e.g. the UI task.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            warn!("notification receiver dropped");
        }
    }
}

/// Writes intents to the log. Useful headless.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        info!(
            kind = ?notification.kind,
            title = %notification.title,
            body = %notification.body,
            "notification"
        );
    }
}
