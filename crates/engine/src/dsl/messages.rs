use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Info,
    Warn,
    Error,
    Skip,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageKind::Info => "info",
            MessageKind::Warn => "warn",
            MessageKind::Error => "error",
            MessageKind::Skip => "skip",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub desc: String,
}

/// Ordered log of what happened while a run command executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Messages {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Message>,
}

impl Messages {
    fn push(&mut self, kind: MessageKind, desc: impl Into<String>) -> &mut Self {
        let desc = desc.into();
        if !desc.is_empty() {
            self.items.push(Message { kind, desc });
        }
        self
    }

    pub fn info(&mut self, desc: impl Into<String>) -> &mut Self {
        self.push(MessageKind::Info, desc)
    }

    pub fn warn(&mut self, desc: impl Into<String>) -> &mut Self {
        self.push(MessageKind::Warn, desc)
    }

    pub fn error(&mut self, desc: impl Into<String>) -> &mut Self {
        self.push(MessageKind::Error, desc)
    }

    pub fn skip(&mut self, desc: impl Into<String>) -> &mut Self {
        self.push(MessageKind::Skip, desc)
    }

    pub fn merge(&mut self, other: Messages) -> &mut Self {
        self.items.extend(other.items);
        self
    }

    /// First error recorded, which is the root cause of a failed command.
    pub fn first_error(&self) -> Option<&str> {
        self.items
            .iter()
            .find(|message| message.kind == MessageKind::Error)
            .map(|message| message.desc.as_str())
    }

    pub fn has_error(&self) -> bool {
        self.first_error().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for Messages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, message) in self.items.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}: {}", message.kind, message.desc)?;
        }
        Ok(())
    }
}
