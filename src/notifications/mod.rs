use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, warn};

pub mod telegram;

pub use telegram::TelegramSink;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Delivers operator-facing messages over some chat transport.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_text(&self, message: &str) -> Result<(), SenderError>;

    /// Sends a JPEG image with `caption` underneath.
    async fn send_photo(&self, jpeg: Vec<u8>, caption: &str) -> Result<(), SenderError>;
}

/// Sends `message`, logging and swallowing any failure.
pub async fn deliver_text(sink: &dyn NotificationSink, message: &str) -> bool {
    match sink.send_text(message).await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "Failed to deliver notification.");
            false
        }
    }
}

/// Sends a photo, falling back once to a text-only message if that fails.
pub async fn deliver_photo_or_text(
    sink: &dyn NotificationSink,
    jpeg: Vec<u8>,
    caption: &str,
) -> bool {
    match sink.send_photo(jpeg, caption).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Photo delivery failed, retrying as text.");
            deliver_text(sink, caption).await
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        Text(String),
        Photo(usize, String),
    }

    /// Records every delivered message; can be told to fail photos or everything.
    #[derive(Default)]
    pub struct RecordingSink {
        sent: Mutex<Vec<Sent>>,
        pub fail_photos: AtomicBool,
        pub fail_all: AtomicBool,
    }

    impl RecordingSink {
        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .map(|s| match s {
                    Sent::Text(t) | Sent::Photo(_, t) => t,
                })
                .collect()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send_text(&self, message: &str) -> Result<(), SenderError> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(SenderError::SendFailed("offline".into()));
            }
            self.sent.lock().unwrap().push(Sent::Text(message.to_string()));
            Ok(())
        }

        async fn send_photo(&self, jpeg: Vec<u8>, caption: &str) -> Result<(), SenderError> {
            if self.fail_all.load(Ordering::SeqCst) || self.fail_photos.load(Ordering::SeqCst) {
                return Err(SenderError::SendFailed("photo rejected".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Photo(jpeg.len(), caption.to_string()));
            Ok(())
        }
    }
}
