//! Job notifications fanned out over a broadcast channel

use tokio::sync::broadcast;
use tracing::trace;

use crate::core::{JobNotification, Notifier};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts job changes to every connected dashboard socket
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<JobNotification>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobNotification> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, notification: JobNotification) {
        // No subscribers is not an error
        if self.sender.send(notification).is_err() {
            trace!("No notification subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobStatus;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscribers_receive_published_notifications() {
        let notifier = BroadcastNotifier::new();
        notifier.publish(JobNotification {
            job_id: Uuid::new_v4(),
            user_id: "nobody-listening".to_string(),
            status: JobStatus::Pending,
            progress: 0,
            error_message: None,
            timestamp: 0,
        });

        let mut rx = notifier.subscribe();
        let job_id = Uuid::new_v4();
        notifier.publish(JobNotification {
            job_id,
            user_id: "user-1".to_string(),
            status: JobStatus::Running,
            progress: 10,
            error_message: None,
            timestamp: 0,
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_id, job_id);
        assert_eq!(received.status, JobStatus::Running);
    }
}
