//! Enumerated status and category domains

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::column::{Field, SqlType};
use crate::value::Value;
use crate::{Error, Result};

/// Lifecycle of an asynchronous analytics report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Processing,
    Done,
    Failed,
}

impl ReportStatus {
    pub const VALUES: &'static [&'static str] = &["processing", "done", "failed"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Processing => "processing",
            ReportStatus::Done => "done",
            ReportStatus::Failed => "failed",
        }
    }

    /// Done and failed reports never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Done | ReportStatus::Failed)
    }
}

impl FromStr for ReportStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "processing" => Ok(ReportStatus::Processing),
            "done" => Ok(ReportStatus::Done),
            "failed" => Ok(ReportStatus::Failed),
            _ => Err(Error::InvalidArgument(format!("Unknown report status: {}", s))),
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Field for ReportStatus {
    const SQL_TYPE: SqlType = SqlType::Text;
    const DOMAIN: Option<&'static [&'static str]> = Some(Self::VALUES);

    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => s.parse(),
            other => Err(Error::Decode(format!("expected report status, got {}", other.type_name()))),
        }
    }
}

/// Speaker of an archived conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub const VALUES: &'static [&'static str] = &["user", "assistant", "system"];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl FromStr for MessageRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "user" | "human" => Ok(MessageRole::User),
            "assistant" | "bot" | "ai" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(Error::InvalidArgument(format!("Unknown message role: {}", s))),
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Field for MessageRole {
    const SQL_TYPE: SqlType = SqlType::Text;
    const DOMAIN: Option<&'static [&'static str]> = Some(Self::VALUES);

    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => s.parse(),
            other => Err(Error::Decode(format!("expected message role, got {}", other.type_name()))),
        }
    }
}
