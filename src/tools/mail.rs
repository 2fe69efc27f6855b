//! Mail tools
//!
//! The mail service itself is a collaborator behind [`MailClient`]; these
//! tools only adapt its call/return contract for the dispatcher.

use std::sync::Arc;

use serde::Deserialize;

use crate::tools::Tool;
use crate::{MurmurError, Result};

/// Default number of messages returned by `read_emails`.
const DEFAULT_READ_COUNT: usize = 5;

/// Mail service collaborator.
pub trait MailClient: Send + Sync {
    /// Send a message, returning a human-readable confirmation.
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<String>;

    /// Return up to `max_results` inbox messages as display text.
    fn read_inbox(&self, max_results: usize) -> Result<String>;
}

/// Placeholder client used when no mail account is configured.
pub struct UnconfiguredMailClient;

impl MailClient for UnconfiguredMailClient {
    fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<String> {
        Err(MurmurError::ToolError(
            "no mail account is configured".to_string(),
        ))
    }

    fn read_inbox(&self, _max_results: usize) -> Result<String> {
        Err(MurmurError::ToolError(
            "no mail account is configured".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SendEmailArgs {
    to: String,
    subject: String,
    body: String,
}

pub struct SendEmailTool {
    client: Arc<dyn MailClient>,
}

impl SendEmailTool {
    pub fn new(client: Arc<dyn MailClient>) -> Self {
        Self { client }
    }
}

impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email message on behalf of the user"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "Recipient address" },
                "subject": { "type": "string", "description": "Subject line" },
                "body": { "type": "string", "description": "Plain-text message body" },
            },
            "required": ["to", "subject", "body"],
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: SendEmailArgs = serde_json::from_value(args)
            .map_err(|e| MurmurError::ProtocolError(format!("invalid arguments: {}", e)))?;
        self.client.send(&args.to, &args.subject, &args.body)
    }
}

#[derive(Debug, Deserialize)]
struct ReadEmailsArgs {
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct ReadEmailsTool {
    client: Arc<dyn MailClient>,
}

impl ReadEmailsTool {
    pub fn new(client: Arc<dyn MailClient>) -> Self {
        Self { client }
    }
}

impl Tool for ReadEmailsTool {
    fn name(&self) -> &str {
        "read_emails"
    }

    fn description(&self) -> &str {
        "Read the most recent messages from the user's inbox"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "max_results": {
                    "type": "integer",
                    "description": "Number of messages to return (default 5)",
                },
            },
        })
    }

    fn execute(&self, args: serde_json::Value) -> Result<String> {
        let args: ReadEmailsArgs = serde_json::from_value(args)
            .map_err(|e| MurmurError::ProtocolError(format!("invalid arguments: {}", e)))?;
        self.client
            .read_inbox(args.max_results.unwrap_or(DEFAULT_READ_COUNT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingMailClient {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingMailClient {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl MailClient for RecordingMailClient {
        fn send(&self, to: &str, subject: &str, body: &str) -> Result<String> {
            self.sent
                .lock()
                .push((to.to_string(), subject.to_string(), body.to_string()));
            Ok(format!("Message sent to {}", to))
        }

        fn read_inbox(&self, max_results: usize) -> Result<String> {
            Ok(format!("{} messages", max_results))
        }
    }

    #[test]
    fn test_send_email_forwards_to_client() {
        let client = Arc::new(RecordingMailClient::new());
        let tool = SendEmailTool::new(client.clone());

        let result = tool
            .execute(serde_json::json!({
                "to": "a@b.c",
                "subject": "hi",
                "body": "hello",
            }))
            .unwrap();

        assert_eq!(result, "Message sent to a@b.c");
        assert_eq!(client.sent.lock().len(), 1);
    }

    #[test]
    fn test_send_email_missing_field_is_protocol_error() {
        let tool = SendEmailTool::new(Arc::new(RecordingMailClient::new()));
        let err = tool.execute(serde_json::json!({ "to": "a@b.c" })).unwrap_err();
        assert!(matches!(err, MurmurError::ProtocolError(_)));
    }

    #[test]
    fn test_read_emails_default_count() {
        let tool = ReadEmailsTool::new(Arc::new(RecordingMailClient::new()));
        let result = tool.execute(serde_json::json!({})).unwrap();
        assert_eq!(result, "5 messages");
    }

    #[test]
    fn test_unconfigured_client_errors() {
        let tool = ReadEmailsTool::new(Arc::new(UnconfiguredMailClient));
        assert!(tool.execute(serde_json::json!({})).is_err());
    }
}
