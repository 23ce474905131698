//! The Job value type, its identity, and its finite status/priority enums.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque globally-unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Generates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job priority. Ordered so that `High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl Priority {
    /// All priorities, strictly highest first — the order `Dequeue` polls in.
    pub const ALL_HIGH_FIRST: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A job's lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Scheduled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Scheduled => "scheduled",
        };
        write!(f, "{}", s)
    }
}

/// A job's payload. Defaults to text; binary framing is an explicit opt-in rather than
/// autodetected, so a client and worker always agree on the scheme out of band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Payload {
    pub fn text(s: impl Into<String>) -> Self {
        Payload::Text(s.into())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Payload::Binary(bytes.into())
    }

    /// Returns the payload as text, failing if it was stored as binary.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Binary(_) => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Payload::Binary(b) => Some(b),
            Payload::Text(_) => None,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// The single unit the queue persists and moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub description: Option<String>,
    pub payload: Payload,
    pub status: JobStatus,
    pub priority: Priority,
    pub routing_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    /// Additive, optional tracing aids; not part of any status invariant.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl Job {
    /// Validates a routing key against `[A-Za-z0-9_-]{1,64}`.
    pub fn validate_routing_key(key: &str) -> JobResult<()> {
        if key.is_empty() || key.len() > 64 {
            return Err(JobError::InvalidRoutingKey(format!(
                "routing key must be 1-64 characters, got {}",
                key.len()
            )));
        }
        if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(JobError::InvalidRoutingKey(format!(
                "routing key '{}' contains characters outside [A-Za-z0-9_-]",
                key
            )));
        }
        Ok(())
    }

    /// Constructs a new pending job with freshly generated identity.
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            description: None,
            payload,
            status: JobStatus::Pending,
            priority: Priority::Normal,
            routing_key: "default".to_string(),
            created_at: now,
            updated_at: now,
            scheduled_for: None,
            attempts: 0,
            max_retries: 3,
            error: None,
            tags: Vec::new(),
            correlation_id: None,
        }
    }

    pub fn update_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_routing_key(&mut self, key: impl Into<String>) -> JobResult<()> {
        let key = key.into();
        Self::validate_routing_key(&key)?;
        self.routing_key = key;
        Ok(())
    }

    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_has_pending_status_and_zero_attempts() {
        let job = Job::new("send_email", Payload::text("hi"));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.routing_key, "default");
    }

    #[test]
    fn routing_key_accepts_valid_values() {
        assert!(Job::validate_routing_key("gpu-cluster_1").is_ok());
    }

    #[test]
    fn routing_key_rejects_empty() {
        assert!(Job::validate_routing_key("").is_err());
    }

    #[test]
    fn routing_key_rejects_too_long() {
        let key = "a".repeat(65);
        assert!(Job::validate_routing_key(&key).is_err());
    }

    #[test]
    fn routing_key_rejects_bad_characters() {
        assert!(Job::validate_routing_key("not valid!").is_err());
    }

    #[test]
    fn round_trip_json_preserves_fields() {
        let job = Job::new("ping", Payload::text("{}"));
        let json = job.to_json().unwrap();
        let restored = Job::from_json(&json).unwrap();
        assert_eq!(job.id, restored.id);
        assert_eq!(job.name, restored.name);
        assert_eq!(job.status, restored.status);
    }

    #[test]
    fn priority_ordering_is_strict() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
