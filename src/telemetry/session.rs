use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

const SUFFIX_LEN: usize = 6;

/// Session identifier: base-36 millisecond timestamp, a dash, and a random
/// suffix. Unique for the lifetime of the process for all practical purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let millis = now.timestamp_millis().max(0) as u64;
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", to_base36(millis), &random[..SUFFIX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// A timestamp the store fills in on write.
///
/// The service never stamps session boundaries with its own clock; it sends
/// `ServerTimestamp` and keeps whatever the store hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerTime {
    ServerTimestamp,
    #[serde(untagged)]
    At(DateTime<Utc>),
}

impl ServerTime {
    pub fn resolve(self, now: DateTime<Utc>) -> Self {
        match self {
            ServerTime::ServerTimestamp => ServerTime::At(now),
            at => at,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            ServerTime::At(t) => Some(*t),
            ServerTime::ServerTimestamp => None,
        }
    }
}

/// Describes the host the session ran on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_height: Option<u32>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl HostMetadata {
    /// Best effort description of the current process.
    pub fn detect() -> Self {
        Self {
            user_agent: Some(format!(
                "{}/{} ({}; {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            ..Self::default()
        }
    }

    pub fn with_screen(mut self, width: u32, height: u32) -> Self {
        self.screen_width = Some(width);
        self.screen_height = Some(height);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra
            .insert(key.into(), serde_json::Value::String(value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub participant_id: Option<String>,
    pub start_time: ServerTime,
    pub end_time: Option<ServerTime>,
    #[serde(flatten)]
    pub host: HostMetadata,
}

impl SessionRecord {
    pub fn open(participant_id: Option<String>, host: HostMetadata) -> Self {
        Self {
            participant_id,
            start_time: ServerTime::ServerTimestamp,
            end_time: None,
            host,
        }
    }

    pub fn closed(&self) -> Self {
        Self {
            end_time: Some(ServerTime::ServerTimestamp),
            ..self.clone()
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Replaces every `ServerTimestamp` placeholder with `now`.
    pub fn resolved(&self, now: DateTime<Utc>) -> Self {
        Self {
            start_time: self.start_time.resolve(now),
            end_time: self.end_time.map(|t| t.resolve(now)),
            ..self.clone()
        }
    }
}
