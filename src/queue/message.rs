use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::UserRole;
use crate::queue::Envelope;

/// Published by the submission handler; consumed by the request worker.
///
/// Older publishers name the input location `s3_inputs_bucket` /
/// `s3_key_input_file`; both spellings are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMessage {
    pub job_id: String,
    pub user_id: String,
    pub input_file_name: String,
    #[serde(alias = "s3_inputs_bucket")]
    pub input_bucket: String,
    #[serde(alias = "s3_key_input_file")]
    pub input_key: String,
    /// Role at submission time.
    pub user_role: UserRole,
}

/// Published by the task runner for free-tier jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRequest {
    pub user_id: String,
    pub job_id: String,
    #[serde(alias = "s3_results_bucket")]
    pub results_bucket: String,
    #[serde(alias = "s3_key_result_file")]
    pub result_key: String,
}

/// Published once per archived job when a user upgrades to premium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThawRequest {
    pub user_id: String,
    pub archive_id: String,
}

/// Sent by the cold tier when a retrieval job finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetrievalNotification {
    /// Retrieval job identifier.
    pub job_id: String,
    pub archive_id: String,
    /// Free-form description set at initiation; carries the owning user id.
    pub job_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

#[derive(Deserialize)]
struct PushEvent {
    #[serde(rename = "Records")]
    records: Vec<PushRecord>,
}

#[derive(Deserialize)]
struct PushRecord {
    #[serde(rename = "Sns")]
    sns: Envelope,
}

impl RetrievalNotification {
    pub fn user_id(&self) -> &str {
        &self.job_description
    }

    /// Decode a completion event in any of the shapes it arrives in:
    /// the bare notification, a queue envelope around it, or a push event
    /// (`{"Records":[{"Sns":{"Message":"..."}}]}`). Only the first record of
    /// a push event is used.
    pub fn from_event(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        if value.get("Records").is_some() {
            let event: PushEvent = serde_json::from_value(value)?;
            let record = event.records.into_iter().next().ok_or_else(|| {
                <serde_json::Error as serde::de::Error>::custom("push event has no records")
            })?;
            return record.sns.payload();
        }
        if value.get("Message").is_some() {
            let envelope: Envelope = serde_json::from_value(value)?;
            return envelope.payload();
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_accepts_legacy_field_names() {
        let inner = r#"{
            "job_id": "j1",
            "user_id": "u1",
            "input_file_name": "a.vcf",
            "s3_inputs_bucket": "gas-inputs",
            "s3_key_input_file": "gas/u1/j1~a.vcf",
            "submit_time": 1700000000,
            "job_status": "PENDING",
            "user_role": "free_user"
        }"#;
        let msg: SubmissionMessage = serde_json::from_str(inner).unwrap();
        assert_eq!(msg.input_bucket, "gas-inputs");
        assert_eq!(msg.input_key, "gas/u1/j1~a.vcf");
        assert_eq!(msg.user_role, UserRole::FreeUser);
    }

    #[test]
    fn submission_rejects_unknown_role() {
        let inner = r#"{"job_id":"j","user_id":"u","input_file_name":"a.vcf",
            "input_bucket":"b","input_key":"k","user_role":"root"}"#;
        assert!(serde_json::from_str::<SubmissionMessage>(inner).is_err());
    }

    #[test]
    fn notification_from_bare_payload() {
        let raw = r#"{"JobId":"r1","ArchiveId":"a1","JobDescription":"u1","StatusCode":"Succeeded"}"#;
        let n = RetrievalNotification::from_event(raw).unwrap();
        assert_eq!(n.job_id, "r1");
        assert_eq!(n.archive_id, "a1");
        assert_eq!(n.user_id(), "u1");
        assert_eq!(n.status_code.as_deref(), Some("Succeeded"));
    }

    #[test]
    fn notification_from_push_event() {
        let inner = r#"{"JobId":"r2","ArchiveId":"a2","JobDescription":"u2"}"#;
        let raw = serde_json::json!({
            "Records": [{ "Sns": { "Message": inner } }]
        })
        .to_string();
        let n = RetrievalNotification::from_event(&raw).unwrap();
        assert_eq!(n.job_id, "r2");
        assert_eq!(n.user_id(), "u2");
    }

    #[test]
    fn notification_from_queue_envelope() {
        let n = RetrievalNotification {
            job_id: "r3".to_string(),
            archive_id: "a3".to_string(),
            job_description: "u3".to_string(),
            status_code: None,
            tier: Some("Expedited".to_string()),
        };
        let body = Envelope::wrap("gas-restore", &n).unwrap().to_body().unwrap();
        assert_eq!(RetrievalNotification::from_event(&body).unwrap(), n);
    }

    #[test]
    fn empty_push_event_is_malformed() {
        assert!(RetrievalNotification::from_event(r#"{"Records":[]}"#).is_err());
    }
}
