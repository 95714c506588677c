use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Recipient, SenderCredentials, SenderSpec};
use crate::relay::{MailRelay, OutgoingEmail, RelayError};

/// Everything needed for one dispatch run, already validated where validation
/// is a request-level concern. Sender specs stay raw: each one is vetted in
/// the loop so a bad sender fails alone.
pub struct DispatchRequest {
    pub senders: Vec<SenderSpec>,
    pub recipients: Vec<Recipient>,
    pub subject: String,
    pub body: String,
    pub quota: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientResult {
    pub recipient: String,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderResult {
    pub sender: String,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
    /// How many recipients this sender's slice covered, whether or not any
    /// message went out.
    pub assigned: usize,
    pub elapsed_ms: u64,
    pub recipients: Vec<RecipientResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub started_at: DateTime<Utc>,
    /// Recipients covered by some sender's slice.
    pub assigned: usize,
    /// Recipients beyond the combined sender capacity. They are dropped for
    /// this run, not queued; the count makes the drop visible to the caller.
    pub unassigned: usize,
    pub results: Vec<SenderResult>,
}

/// Splits `recipients` into contiguous per-sender slices of at most `quota`,
/// in input order. Slice `i` covers `recipients[i * quota .. (i + 1) * quota]`.
/// Stops as soon as either senders or recipients run out; never rebalances.
pub fn partition(
    recipients: &[Recipient],
    sender_count: usize,
    quota: usize,
) -> Vec<&[Recipient]> {
    if quota == 0 {
        return Vec::new();
    }
    let mut slices = Vec::new();
    for i in 0..sender_count {
        let Some(start) = i.checked_mul(quota) else {
            break;
        };
        if start >= recipients.len() {
            break;
        }
        let end = start.saturating_add(quota).min(recipients.len());
        slices.push(&recipients[start..end]);
    }
    slices
}

/// Replaces `{field}` tokens with the recipient's fields. Placeholders without
/// a matching field are left verbatim; the rest of the template is untouched.
pub fn render_template(template: &str, recipient: &Recipient) -> String {
    let mut rendered = template.to_owned();
    for (field, value) in recipient.substitutions() {
        let placeholder = format!("{{{field}}}");
        if rendered.contains(&placeholder) {
            rendered = rendered.replace(&placeholder, value);
        }
    }
    rendered
}

pub struct BatchDispatcher {
    relay: Arc<dyn MailRelay>,
    send_delay: Duration,
}

impl BatchDispatcher {
    pub fn new(relay: Arc<dyn MailRelay>, send_delay: Duration) -> Self {
        Self { relay, send_delay }
    }

    /// Runs the whole request: senders in input order, each against its own
    /// partition slice. A sender that fails outright still leaves a result
    /// behind, and the loop moves on to the next one.
    #[tracing::instrument(
        name = "Dispatching a bulk email run",
        skip(self, request),
        fields(
            sender_count = request.senders.len(),
            recipient_count = request.recipients.len(),
            quota = request.quota,
        )
    )]
    pub async fn dispatch(&self, request: &DispatchRequest) -> DispatchReport {
        let started_at = Utc::now();
        let batches = partition(&request.recipients, request.senders.len(), request.quota);
        let assigned: usize = batches.iter().map(|batch| batch.len()).sum();
        let unassigned = request.recipients.len() - assigned;
        if unassigned > 0 {
            tracing::warn!(
                unassigned,
                "Recipients exceed the combined sender capacity and will not be contacted"
            );
        }

        let mut results = Vec::with_capacity(batches.len());
        for (spec, batch) in request.senders.iter().zip(batches) {
            results.push(
                self.run_sender(spec, batch, &request.subject, &request.body)
                    .await,
            );
        }

        DispatchReport {
            started_at,
            assigned,
            unassigned,
            results,
        }
    }

    async fn run_sender(
        &self,
        spec: &SenderSpec,
        batch: &[Recipient],
        subject: &str,
        body: &str,
    ) -> SenderResult {
        let started = Instant::now();
        let outcome = match spec.parse() {
            Ok(credentials) => self
                .send_batch(&credentials, batch, subject, body)
                .await
                .map_err(|e| e.to_string()),
            Err(reason) => Err(reason),
        };
        match outcome {
            Ok(recipients) => SenderResult {
                sender: spec.email.clone(),
                outcome: DeliveryOutcome::Sent,
                assigned: batch.len(),
                elapsed_ms: elapsed_ms(started),
                recipients,
            },
            Err(reason) => {
                tracing::warn!(
                    sender_email = %spec.email,
                    %reason,
                    "Sender failed before any message went out"
                );
                SenderResult {
                    sender: spec.email.clone(),
                    outcome: DeliveryOutcome::Failed(reason),
                    assigned: batch.len(),
                    elapsed_ms: elapsed_ms(started),
                    recipients: Vec::new(),
                }
            }
        }
    }

    /// One relay session for the whole batch. A rejected message is recorded
    /// and the loop keeps going on the same session; only a failure to open
    /// the session bubbles up. The session is released when this returns.
    #[tracing::instrument(
        name = "Sending a batch",
        skip(self, sender, batch, subject, body_template),
        fields(sender_email = %sender.email, batch_size = batch.len())
    )]
    async fn send_batch(
        &self,
        sender: &SenderCredentials,
        batch: &[Recipient],
        subject: &str,
        body_template: &str,
    ) -> Result<Vec<RecipientResult>, RelayError> {
        let mut session = self.relay.authenticate(sender).await?;
        let mut results = Vec::with_capacity(batch.len());
        for (position, recipient) in batch.iter().enumerate() {
            let started = Instant::now();
            let email = OutgoingEmail {
                from_name: sender.name.as_ref().to_owned(),
                from_email: sender.email.as_ref().to_owned(),
                to_name: recipient.name.as_ref().map(|name| name.as_ref().to_owned()),
                to_email: recipient.email.as_ref().to_owned(),
                subject: render_template(subject, recipient),
                body: render_template(body_template, recipient),
            };
            let outcome = match session.submit(&email).await {
                Ok(()) => {
                    tracing::info!(recipient_email = %recipient.email, "Message accepted by the relay");
                    DeliveryOutcome::Sent
                }
                Err(e) => {
                    tracing::warn!(
                        recipient_email = %recipient.email,
                        error = %e,
                        "Message rejected by the relay"
                    );
                    DeliveryOutcome::Failed(e.to_string())
                }
            };
            results.push(RecipientResult {
                recipient: recipient.email.as_ref().to_owned(),
                outcome,
                elapsed_ms: elapsed_ms(started),
            });
            if !self.send_delay.is_zero() && position + 1 < batch.len() {
                tokio::time::sleep(self.send_delay).await;
            }
        }
        Ok(results)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
