//! Owner and public notifications.

use async_trait::async_trait;
use dropwell_core::{Lovelace, Session};
use dropwell_settlement::format_ada;
use parking_lot::Mutex;
use tracing::info;

use crate::recipients::RecipientSet;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Direct message to the session owner.
    async fn notify_owner(&self, owner_id: &str, message: &str);

    /// Announcement on a public channel.
    async fn notify_public(&self, channel: &str, summary: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify_owner(&self, owner_id: &str, message: &str) {
        info!(owner = owner_id, "{}", message);
    }

    async fn notify_public(&self, channel: &str, summary: &str) {
        info!(channel, "{}", summary);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Owner { owner_id: String, message: String },
    Public { channel: String, summary: String },
}

/// Keeps every notification in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn owner_messages(&self, owner_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Owner { owner_id: o, message } if o == owner_id => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify_owner(&self, owner_id: &str, message: &str) {
        self.sent.lock().push(Notification::Owner {
            owner_id: owner_id.to_string(),
            message: message.to_string(),
        });
    }

    async fn notify_public(&self, channel: &str, summary: &str) {
        self.sent.lock().push(Notification::Public {
            channel: channel.to_string(),
            summary: summary.to_string(),
        });
    }
}

pub(crate) fn deposit_instructions(session: &Session, set: &RecipientSet, service_fee: Lovelace) -> String {
    let mut msg = format!(
        "Airdrop {} created.\n\
         Recipients: {}\n\
         Total weight: {}\n\
         Rate per unit: {:.6} ADA\n\
         Payouts: {} ADA\n\
         Network fee reserve: {} ADA\n\
         Service fee: {} ADA\n\
         Please deposit {} ADA to:\n{}\n\
         The address is watched until the deposit arrives.",
        session.session_id,
        set.recipients.len(),
        set.total_weight(),
        set.rate.per_unit() / dropwell_core::LOVELACE_PER_ADA as f64,
        format_ada(session.total_payout),
        format_ada(session.fee_buffer),
        format_ada(service_fee),
        format_ada(session.required_amount),
        session.funding_address,
    );
    if set.dropped_invalid > 0 || set.dropped_dust > 0 {
        msg.push_str(&format!(
            "\nSkipped {} invalid entries and {} below the minimum payout.",
            set.dropped_invalid, set.dropped_dust
        ));
    }
    msg
}

pub(crate) fn completion_message(session: &Session) -> String {
    let mut msg = format!(
        "Airdrop {} complete: {} ADA sent to {} recipients in {} transaction(s).",
        session.session_id,
        format_ada(session.total_payout),
        session.recipients.len(),
        session.distribution_tx_ids.len(),
    );
    for (i, tx) in session.distribution_tx_ids.iter().enumerate() {
        msg.push_str(&format!("\n  batch {}: {}", i + 1, tx));
    }
    if let Some(tx) = &session.service_fee_tx_id {
        msg.push_str(&format!("\nService fee: {}", tx));
    }
    msg
}

pub(crate) fn public_summary(session: &Session) -> String {
    let mut msg = format!(
        "Airdrop complete: {} ADA distributed to {} holders",
        format_ada(session.total_payout),
        session.recipients.len(),
    );
    if let Some(policy) = &session.policy_id {
        msg.push_str(&format!(" of {}", policy));
    }
    msg
}

pub(crate) fn failure_message(session_id: &str, error: &str) -> String {
    format!(
        "Airdrop {} stopped: {}\nFunds remain at the funding address until this is resolved.",
        session_id, error
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_notifier() {
        let n = RecordingNotifier::new();
        n.notify_owner("alice", "hello").await;
        n.notify_public("#drops", "done").await;
        n.notify_owner("bob", "hi").await;

        assert_eq!(n.sent().len(), 3);
        assert_eq!(n.owner_messages("alice"), vec!["hello".to_string()]);
        assert_eq!(
            n.sent()[1],
            Notification::Public { channel: "#drops".into(), summary: "done".into() }
        );
    }
}
