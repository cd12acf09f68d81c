use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// A notable occurrence worth surfacing to an operator or subscriber.
/// Real email/webhook/chat fan-out is out of scope; this is the seam.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    JobSucceeded { job_id: String },
    JobFailed { job_id: String, reason: String },
    InstanceProvisioned { instance_id: String },
    InstanceReclaimed { instance_id: String },
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, event: Event);
}

/// Fire-and-forget notifier that logs through the structured tracing
/// pipeline instead of delivering anywhere external.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: Event) {
        match &event {
            Event::JobSucceeded { job_id } => info!(%job_id, "job succeeded"),
            Event::JobFailed { job_id, reason } => info!(%job_id, %reason, "job failed"),
            Event::InstanceProvisioned { instance_id } => {
                info!(%instance_id, "instance provisioned")
            }
            Event::InstanceReclaimed { instance_id } => {
                info!(%instance_id, "instance reclaimed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_does_not_panic_on_any_variant() {
        let notifier = LogNotifier;
        notifier
            .notify(Event::JobSucceeded {
                job_id: "job-1".into(),
            })
            .await;
        notifier
            .notify(Event::JobFailed {
                job_id: "job-1".into(),
                reason: "timeout".into(),
            })
            .await;
    }
}
