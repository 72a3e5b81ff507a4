use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Outer pub/sub wrapper around a domain payload.
///
/// The payload is double-encoded: `message` is itself a JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    #[serde(rename = "Type", default = "notification_type")]
    pub kind: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub topic_arn: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

fn notification_type() -> String {
    "Notification".to_string()
}

impl Envelope {
    pub fn wrap<T: Serialize + ?Sized>(topic: &str, payload: &T) -> Result<Self> {
        Ok(Self {
            kind: notification_type(),
            message_id: Uuid::new_v4().to_string(),
            topic_arn: topic.to_string(),
            message: serde_json::to_string(payload)?,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_body(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.message)?)
    }

    /// Decode the domain payload straight from a queue body.
    pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
        Self::from_body(body)?.payload()
    }
}
