//! Notification messages and the delivery seam.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use poolwatch_state::HealthSnapshot;

use crate::decision::NotifyReason;
use crate::error::NotifyError;

/// Who the message is from, who it goes to, and which host it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactHeader {
    pub sender: String,
    pub recipient: String,
    pub hostname: String,
}

/// A formatted notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub reason: NotifyReason,
    /// One `pool<TAB>status` line per pool.
    pub summary: String,
    /// Raw sampler output.
    pub detail: String,
    pub header: ContactHeader,
}

impl Notification {
    pub fn new(
        reason: NotifyReason,
        snapshot: &HealthSnapshot,
        detail: String,
        header: ContactHeader,
    ) -> Self {
        Self {
            reason,
            summary: snapshot.to_string(),
            detail,
            header,
        }
    }

    pub fn subject(&self) -> String {
        let prefix = match self.reason {
            NotifyReason::Reminder => "[reminder] ",
            NotifyReason::Transition => "",
        };
        format!("{prefix}Pool status on {}", self.header.hostname)
    }

    pub fn body(&self) -> String {
        format!("{}\n\nUnabridged Status:\n\n{}", self.summary, self.detail)
    }

    /// Full message with `From`/`To`/`Subject` lines, as printed on the console.
    pub fn render(&self) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}",
            self.header.sender,
            self.header.recipient,
            self.subject(),
            self.body()
        )
    }
}

/// Boxed future returned by [`Notifier::notify`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Delivery channel for notifications.
///
/// Implementations do not retry; a failed attempt is reported and the
/// engine's debounce state decides when to try again.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a>;
}

/// Prints notifications to stdout instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> NotifyFuture<'a> {
        Box::pin(async move { write_notification(&mut tokio::io::stdout(), notification).await })
    }
}

/// Write the rendered message followed by a blank line, then flush.
async fn write_notification<W>(out: &mut W, notification: &Notification) -> Result<(), NotifyError>
where
    W: AsyncWrite + Unpin,
{
    let text = format!("{}\n\n", notification.render());
    out.write_all(text.as_bytes())
        .await
        .map_err(|e| NotifyError::Delivery(e.to_string()))?;
    out.flush()
        .await
        .map_err(|e| NotifyError::Delivery(e.to_string()))
}
