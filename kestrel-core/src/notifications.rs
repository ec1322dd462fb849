//! Push notifications over ntfy.
//!
//! Optional: configured with `logging.ntfy_topic` (a full topic URL). Only
//! terminal outcomes are pushed; progress stays on the event bus.

use log::warn;
use ntfy::payload::{Payload, Priority};
use ntfy::DispatcherBuilder;

use crate::error::{CoreError, CoreResult};
use crate::util::{format_bytes, size_reduction_percent};

/// Terminal outcomes worth a push notification.
#[derive(Debug, Clone)]
pub enum Notification {
    EncodeComplete {
        filename: String,
        input_size: u64,
        output_size: u64,
    },
    EncodeError {
        filename: String,
        message: String,
    },
    BatchComplete {
        successful: usize,
        total: usize,
    },
}

impl Notification {
    fn title(&self) -> String {
        match self {
            Notification::EncodeComplete { filename, .. } => {
                format!("Encode complete: {}", filename)
            }
            Notification::EncodeError { filename, .. } => format!("Encode failed: {}", filename),
            Notification::BatchComplete { .. } => "Batch complete".to_string(),
        }
    }

    fn message(&self) -> String {
        match self {
            Notification::EncodeComplete {
                input_size,
                output_size,
                ..
            } => format!(
                "{} -> {} ({:.1}% smaller)",
                format_bytes(*input_size),
                format_bytes(*output_size),
                size_reduction_percent(*input_size, *output_size)
            ),
            Notification::EncodeError { message, .. } => message.clone(),
            Notification::BatchComplete { successful, total } => {
                format!("{}/{} files encoded", successful, total)
            }
        }
    }

    fn priority(&self) -> Priority {
        match self {
            Notification::EncodeError { .. } => Priority::High,
            _ => Priority::Default,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Notification::EncodeComplete { .. } => "complete",
            Notification::EncodeError { .. } => "error",
            Notification::BatchComplete { .. } => "batch",
        }
    }
}

/// Sends notifications to an ntfy topic URL.
#[derive(Debug, Clone)]
pub struct NtfySender {
    base_url: String,
    topic: String,
}

impl NtfySender {
    /// `topic_url` is the full URL ("https://ntfy.sh/my-topic").
    pub fn new(topic_url: &str) -> CoreResult<Self> {
        let rest = topic_url.strip_prefix("https://").ok_or_else(|| {
            CoreError::Notification(format!(
                "invalid ntfy topic URL '{}': must start with https://",
                topic_url
            ))
        })?;
        let (host, topic) = rest.split_once('/').ok_or_else(|| {
            CoreError::Notification(format!("URL '{}' is missing a topic path", topic_url))
        })?;
        if host.is_empty() || topic.is_empty() {
            return Err(CoreError::Notification(format!(
                "URL '{}' must carry a host and a topic",
                topic_url
            )));
        }
        Ok(Self {
            base_url: format!("https://{}", host),
            topic: topic.to_string(),
        })
    }

    /// Send one notification. Failures are reported but callers typically
    /// log and continue; a lost notification never fails an encode.
    pub fn send(&self, notification: &Notification) -> CoreResult<()> {
        let dispatcher = DispatcherBuilder::new(&self.base_url)
            .build_blocking()
            .map_err(|e| {
                CoreError::Notification(format!("building ntfy dispatcher: {}", e))
            })?;

        let payload = Payload::new(&self.topic)
            .title(notification.title())
            .message(notification.message())
            .priority(notification.priority())
            .tags(["kestrel".to_string(), notification.tag().to_string()]);

        dispatcher
            .send(&payload)
            .map_err(|e| CoreError::Notification(format!("sending ntfy notification: {}", e)))
    }

    /// Fire-and-forget variant used by the pipeline.
    pub fn send_best_effort(&self, notification: &Notification) {
        if let Err(e) = self.send(notification) {
            warn!("notification failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_topic_urls_parse() {
        let sender = NtfySender::new("https://ntfy.sh/kestrel-encodes").unwrap();
        assert_eq!(sender.base_url, "https://ntfy.sh");
        assert_eq!(sender.topic, "kestrel-encodes");
    }

    #[test]
    fn invalid_topic_urls_are_rejected() {
        assert!(NtfySender::new("http://ntfy.sh/topic").is_err());
        assert!(NtfySender::new("https://ntfy.sh").is_err());
        assert!(NtfySender::new("https:///topic").is_err());
    }

    #[test]
    fn notification_text_is_informative() {
        let notification = Notification::EncodeComplete {
            filename: "movie.mkv".to_string(),
            input_size: 4 * 1024 * 1024 * 1024,
            output_size: 1024 * 1024 * 1024,
        };
        assert!(notification.title().contains("movie.mkv"));
        assert!(notification.message().contains("75.0% smaller"));
    }
}
