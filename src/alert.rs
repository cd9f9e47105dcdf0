//! Operator alerting.
//!
//! The supervisor and the router raise alerts through [`AlertNotifier`].
//! Delivery (mail, chat, pager) lives outside this crate; [`LogNotifier`]
//! writes alerts to the log and is what the binary uses by default.

use futures::future::BoxFuture;

use crate::error::Result;

/// Outbound alert channel.
pub trait AlertNotifier: Send + Sync {
    /// Sends `message` to `recipient`.
    fn notify<'a>(&'a self, recipient: &'a str, message: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Writes alerts to the log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl AlertNotifier for LogNotifier {
    fn notify<'a>(&'a self, recipient: &'a str, message: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::error!(recipient, "ALERT: {}", message);
            Ok(())
        })
    }
}

/// Notifies every recipient, logging failures instead of returning them.
///
/// Returns the number of recipients that were notified.
pub async fn notify_all(
    notifier: &dyn AlertNotifier,
    recipients: &[String],
    message: &str,
) -> usize {
    if recipients.is_empty() {
        tracing::error!("no alert recipients configured: {}", message);
        return 0;
    }

    let mut delivered = 0;
    for recipient in recipients {
        match notifier.notify(recipient, message).await {
            Ok(()) => delivered += 1,
            Err(e) => tracing::warn!(recipient = %recipient, error = %e, "alert delivery failed"),
        }
    }
    delivered
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::error::Error;

    struct FailingNotifier;

    impl AlertNotifier for FailingNotifier {
        fn notify<'a>(&'a self, _: &'a str, _: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Err(Error::ChannelClosed) })
        }
    }

    #[tokio::test]
    async fn test_notify_all() {
        let notifier = RecordingNotifier::default();
        let recipients = vec!["ops@example.com".to_string(), "+99365000001".to_string()];
        assert_eq!(notify_all(&notifier, &recipients, "modem down").await, 2);
        assert_eq!(
            notifier.calls(),
            vec![
                ("ops@example.com".to_string(), "modem down".to_string()),
                ("+99365000001".to_string(), "modem down".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_notify_all_tolerates_failures() {
        let recipients = vec!["ops".to_string()];
        assert_eq!(notify_all(&FailingNotifier, &recipients, "x").await, 0);
        assert_eq!(notify_all(&LogNotifier, &[], "x").await, 0);
        assert_eq!(notify_all(&LogNotifier, &recipients, "x").await, 1);
    }
}
