//! Incoming message routing.
//!
//! The router listens for unsolicited modem lines. A new-message indication
//! is followed up with a read through the send queue; an unsolicited `+CMT`
//! header is paired with the line after it. Messages from the operator's
//! service code are scanned for a balance report, and a balance under the
//! threshold is escalated to the administrators by SMS and to the alert
//! recipients through the alert channel.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alert::{AlertNotifier, notify_all};
use crate::event::{SessionEvent, Subscription};
use crate::protocol::{BodyHeader, Notification, decode_deliver_pdu, parse_notification_line};
use crate::queue::{SendQueue, stopped};
use crate::types::InboundMessage;

/// Default low-balance threshold.
pub const DEFAULT_LOW_BALANCE_THRESHOLD: f64 = 10.0;

/// Unit that follows the amount in balance reports.
const CURRENCY: &str = "manat";

/// Router settings.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Sender whose messages carry balance reports.
    pub service_short_code: String,
    /// Balances below this trigger alerts.
    pub low_balance_threshold: f64,
    /// Numbers that receive low-balance SMS.
    pub admin_numbers: Vec<String>,
    /// Recipients for the alert channel.
    pub alert_recipients: Vec<String>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            service_short_code: "0800".into(),
            low_balance_threshold: DEFAULT_LOW_BALANCE_THRESHOLD,
            admin_numbers: Vec::new(),
            alert_recipients: Vec::new(),
        }
    }
}

/// Splits an administrator list on commas, semicolons or whitespace.
#[must_use]
pub fn parse_admin_numbers(list: &str) -> Vec<String> {
    list.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|number| !number.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Extracts the amount from text like `Balance: 12,50 manat`.
///
/// A comma is accepted as the decimal separator and the unit is matched
/// without regard to case.
#[must_use]
pub fn parse_balance(text: &str) -> Option<f64> {
    // ASCII lowercasing keeps byte offsets valid for `text`
    let lower = text.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = lower[from..].find(CURRENCY) {
        let unit = from + found;
        let before = text[..unit].trim_end();
        let start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit() || *c == '.' || *c == ',')
            .last()
            .map_or(before.len(), |(i, _)| i);
        let amount = before[start..]
            .trim_matches(|c: char| c == '.' || c == ',')
            .replace(',', ".");
        if let Ok(value) = amount.parse() {
            return Some(value);
        }
        from = unit + CURRENCY.len();
    }
    None
}

/// Turns a message body into an [`InboundMessage`].
fn decode_body(header: &BodyHeader, body: &str) -> Option<InboundMessage> {
    match header {
        BodyHeader::Pdu { .. } => match decode_deliver_pdu(body.trim()) {
            Ok(pdu) => Some(pdu.into()),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring undecodable message");
                None
            }
        },
        BodyHeader::Text { sender } => Some(InboundMessage {
            sender: sender.clone(),
            text: body.to_owned(),
            timestamp: None,
        }),
    }
}

/// Classifies unsolicited modem output.
pub struct IncomingMessageRouter {
    queue: SendQueue,
    notifier: Arc<dyn AlertNotifier>,
    options: RouterOptions,
}

impl IncomingMessageRouter {
    /// Creates a router that enqueues alerts on `queue`.
    #[must_use]
    pub fn new(queue: SendQueue, notifier: Arc<dyn AlertNotifier>, options: RouterOptions) -> Self {
        Self {
            queue,
            notifier,
            options,
        }
    }

    /// Spawns the routing task over `events`.
    pub fn start(self, events: Subscription, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(events, shutdown))
    }

    async fn run(self, mut events: Subscription, mut shutdown: watch::Receiver<bool>) {
        let mut pending = None;
        loop {
            let event = tokio::select! {
                biased;
                () = stopped(&mut shutdown) => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let SessionEvent::Unsolicited(line) = event {
                self.handle_line(&line, &mut pending).await;
            }
        }
        tracing::debug!("router stopped");
    }

    async fn handle_line(&self, line: &str, pending: &mut Option<BodyHeader>) {
        if let Some(header) = pending.take() {
            if let Some(message) = decode_body(&header, line) {
                self.route(&message).await;
            }
            return;
        }

        match parse_notification_line(line) {
            Some(Notification::MessageStored { storage, index }) => {
                tracing::debug!(%storage, index, "new message stored");
                match self.queue.read_message(index).await {
                    Ok(Some(read)) => {
                        if let Some(message) = decode_body(&read.header, &read.body) {
                            self.route(&message).await;
                        }
                    }
                    Ok(None) => tracing::debug!(index, "stored message vanished"),
                    Err(e) => tracing::warn!(index, error = %e, "failed to read stored message"),
                }
            }
            Some(Notification::MessageBody(header)) => *pending = Some(header),
            None => tracing::trace!(line, "ignoring unsolicited line"),
        }
    }

    /// Acts on one received message.
    pub async fn route(&self, message: &InboundMessage) {
        tracing::info!(sender = %message.sender, "message received");
        if message.sender.trim_start_matches('+') != self.options.service_short_code {
            return;
        }

        let Some(balance) = parse_balance(&message.text) else {
            tracing::debug!("service message without a balance");
            return;
        };
        let threshold = self.options.low_balance_threshold;
        tracing::info!(balance, "balance report");
        if balance >= threshold {
            return;
        }

        let alert = format!("Low balance: {balance:.2} {CURRENCY} (threshold {threshold:.2})");
        tracing::warn!(balance, threshold, "low balance");
        for admin in &self.options.admin_numbers {
            if let Err(e) = self.queue.enqueue(admin.as_str(), alert.as_str()) {
                tracing::warn!(admin = %admin, error = %e, "failed to queue low-balance SMS");
            }
        }
        notify_all(
            self.notifier.as_ref(),
            &self.options.alert_recipients,
            &alert,
        )
        .await;
    }
}
