use crate::error::{Result, WppError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{10,15}$").expect("valid phone regex"));

/// Strips every non-digit and returns the result when it is 10 to 15 digits long.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if PHONE_RE.is_match(&digits) {
        Some(digits)
    } else {
        None
    }
}

/// International phone number, digits only (country + area + subscriber).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(raw: &str) -> Result<Self> {
        normalize_phone(raw).map(PhoneNumber).ok_or_else(|| {
            WppError::validation(format!(
                "invalid phone number '{}': use 10-15 digits, e.g. 5511999999999",
                raw.trim()
            ))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = WppError;

    fn try_from(value: String) -> Result<Self> {
        PhoneNumber::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self {
        value.0
    }
}

impl AsRef<str> for PhoneNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberRole {
    #[serde(rename = "workers")]
    Worker,
    #[serde(rename = "admins")]
    Admin,
}

impl NumberRole {
    pub fn as_wire(&self) -> &'static str {
        match self {
            NumberRole::Worker => "workers",
            NumberRole::Admin => "admins",
        }
    }
}

impl std::str::FromStr for NumberRole {
    type Err = WppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "worker" | "workers" => Ok(NumberRole::Worker),
            "admin" | "admins" => Ok(NumberRole::Admin),
            other => Err(WppError::validation(format!("unknown role '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Document,
}

impl MessageKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Document => "document",
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

impl std::str::FromStr for MessageKind {
    type Err = WppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "document" => Ok(MessageKind::Document),
            other => Err(WppError::validation(format!("unknown message type '{other}'"))),
        }
    }
}

/// One entry of a mass-send list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRecipient {
    pub number: PhoneNumber,
    pub message: Option<String>,
}

impl BulkRecipient {
    pub fn new(number: PhoneNumber, message: Option<String>) -> Self {
        Self { number, message }
    }

    pub fn is_personalized(&self) -> bool {
        self.message.as_deref().is_some_and(|m| !m.trim().is_empty())
    }

    /// The personalized text when present and non-blank, else `fallback`.
    pub fn message_or<'a>(&'a self, fallback: Option<&'a str>) -> Option<&'a str> {
        match self.message.as_deref() {
            Some(msg) if !msg.trim().is_empty() => Some(msg),
            _ => fallback,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumbersSnapshot {
    #[serde(default)]
    pub workers: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
}

impl NumbersSnapshot {
    pub fn by_role(&self, role: NumberRole) -> &[String] {
        match role {
            NumberRole::Worker => &self.workers,
            NumberRole::Admin => &self.admins,
        }
    }

    pub fn contains(&self, role: NumberRole, number: &str) -> bool {
        self.by_role(role).iter().any(|n| n == number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Disconnected,
    Unknown(String),
}

impl LinkStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "conectado" | "connected" => LinkStatus::Connected,
            "desconectado" | "disconnected" => LinkStatus::Disconnected,
            _ => LinkStatus::Unknown(raw.trim().to_string()),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, LinkStatus::Connected)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Connected => f.write_str("connected"),
            LinkStatus::Disconnected => f.write_str("disconnected"),
            LinkStatus::Unknown(raw) if raw.is_empty() => f.write_str("unknown"),
            LinkStatus::Unknown(raw) => f.write_str(raw),
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|v| !v.is_empty()))
}

/// Historical send record as returned by the reports endpoint.
///
/// Optional text fields are never `Some("")`: an empty value is `None`, which is
/// also how a blank spreadsheet cell reads back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub date_time_queue: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub date_time_send: Option<String>,
    #[serde(default)]
    pub from_number: String,
    #[serde(default)]
    pub to_number: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub message: Option<String>,
}
