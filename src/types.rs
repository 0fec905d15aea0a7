use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// A single action the model asks the agent to perform.
///
/// Exactly one is decoded per decision. Browser-mutating variants carry their
/// targets as `Option` so that a missing field reaches the executor as a typed
/// precondition failure instead of being lost in a decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum AgentAction {
    Click {
        selector: Option<String>,
        reason: String,
    },
    Fill {
        selector: Option<String>,
        value: Option<String>,
        reason: String,
    },
    Select {
        selector: Option<String>,
        value: Option<String>,
        reason: String,
    },
    Check {
        selector: Option<String>,
        #[serde(default = "default_checked")]
        checked: bool,
        reason: String,
    },
    Upload {
        selector: Option<String>,
        file_type: Option<FileKind>,
        reason: String,
    },
    Scroll {
        direction: Option<ScrollDirection>,
        amount: Option<u32>,
        reason: String,
    },
    Wait {
        duration_ms: Option<u64>,
        reason: String,
    },
    Navigate {
        url: Option<String>,
        reason: String,
    },
    Checkpoint {
        checkpoint_type: CheckpointKind,
        message: String,
        #[serde(default)]
        questions: Vec<String>,
        reason: String,
    },
    Done {
        success: bool,
        message: String,
        confirmation_id: Option<String>,
        reason: String,
    },
}

fn default_checked() -> bool {
    true
}

impl AgentAction {
    /// Wire name of the variant, as reported to `on_progress`.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentAction::Click { .. } => "click",
            AgentAction::Fill { .. } => "fill",
            AgentAction::Select { .. } => "select",
            AgentAction::Check { .. } => "check",
            AgentAction::Upload { .. } => "upload",
            AgentAction::Scroll { .. } => "scroll",
            AgentAction::Wait { .. } => "wait",
            AgentAction::Navigate { .. } => "navigate",
            AgentAction::Checkpoint { .. } => "checkpoint",
            AgentAction::Done { .. } => "done",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            AgentAction::Click { reason, .. }
            | AgentAction::Fill { reason, .. }
            | AgentAction::Select { reason, .. }
            | AgentAction::Check { reason, .. }
            | AgentAction::Upload { reason, .. }
            | AgentAction::Scroll { reason, .. }
            | AgentAction::Wait { reason, .. }
            | AgentAction::Navigate { reason, .. }
            | AgentAction::Checkpoint { reason, .. }
            | AgentAction::Done { reason, .. } => reason,
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            AgentAction::Click { selector, .. }
            | AgentAction::Fill { selector, .. }
            | AgentAction::Select { selector, .. }
            | AgentAction::Check { selector, .. }
            | AgentAction::Upload { selector, .. } => selector.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Resume,
    CoverLetter,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Resume => "resume",
            FileKind::CoverLetter => "cover letter",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Login,
    Captcha,
    Questions,
    Review,
    Error,
    Upload,
    Custom,
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckpointKind::Login => "login",
            CheckpointKind::Captcha => "captcha",
            CheckpointKind::Questions => "questions",
            CheckpointKind::Review => "review",
            CheckpointKind::Error => "error",
            CheckpointKind::Upload => "upload",
            CheckpointKind::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// What the human responder is shown at a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointData {
    pub kind: CheckpointKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckpointData {
    pub fn new(kind: CheckpointKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            screenshot: None,
            url: None,
            questions: Vec::new(),
            error: None,
        }
    }
}

/// A human's answer to a checkpoint. `continue: false` ends the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointResponse {
    #[serde(rename = "continue")]
    pub proceed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<CheckpointReply>,
}

impl CheckpointResponse {
    pub fn proceed() -> Self {
        Self {
            proceed: true,
            reply: None,
        }
    }

    /// The fail-closed answer, used for explicit stops and timeouts alike.
    pub fn cancel() -> Self {
        Self {
            proceed: false,
            reply: None,
        }
    }

    pub fn with_reply(mut self, reply: CheckpointReply) -> Self {
        self.reply = Some(reply);
        self
    }
}

/// Kind-specific payload of a checkpoint response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointReply {
    Login {
        #[serde(default)]
        credentials: Option<Credentials>,
    },
    Captcha {
        #[serde(default)]
        solution: Option<String>,
    },
    Questions {
        #[serde(default)]
        answers: BTreeMap<String, String>,
    },
    Review {
        approved: bool,
    },
    Error {
        #[serde(default)]
        instruction: Option<String>,
    },
    Upload {
        #[serde(default)]
        note: Option<String>,
    },
    Custom {
        #[serde(default)]
        instruction: Option<String>,
    },
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Waiting,
    Responded,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(pub String);

impl CheckpointId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub id: CheckpointId,
    pub status: CheckpointStatus,
    pub data: CheckpointData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CheckpointResponse>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl CheckpointRecord {
    pub fn waiting(data: CheckpointData) -> Self {
        Self {
            id: CheckpointId::generate(),
            status: CheckpointStatus::Waiting,
            data,
            response: None,
            created_at: Utc::now(),
            responded_at: None,
        }
    }
}

/// The terminal state a run ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Cancelled,
    TimedOut,
    Fatal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyJobResult {
    pub success: bool,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,
    pub message: String,
    pub steps: u32,
    #[serde(default)]
    pub screenshots: Vec<String>,
    #[serde(rename = "durationMs", with = "duration_ms")]
    pub duration: Duration,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Applicant data the model uses to fill forms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_authorization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_sponsorship: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years_of_experience: Option<u32>,
    /// Free-form answers to common screening questions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fill_action() {
        let action: AgentAction = serde_json::from_str(
            r##"{"action":"fill","selector":"#email","value":"a@b.com","reason":"email field"}"##,
        )
        .unwrap();
        assert_eq!(
            action,
            AgentAction::Fill {
                selector: Some("#email".into()),
                value: Some("a@b.com".into()),
                reason: "email field".into(),
            }
        );
        assert_eq!(action.kind(), "fill");
        assert_eq!(action.selector(), Some("#email"));
    }

    #[test]
    fn test_decode_checkpoint_uses_camel_case_fields() {
        let action: AgentAction = serde_json::from_str(
            r#"{"action":"checkpoint","checkpointType":"review","message":"Ready to submit","reason":"final page"}"#,
        )
        .unwrap();
        match action {
            AgentAction::Checkpoint {
                checkpoint_type,
                message,
                questions,
                ..
            } => {
                assert_eq!(checkpoint_type, CheckpointKind::Review);
                assert_eq!(message, "Ready to submit");
                assert!(questions.is_empty());
            }
            other => panic!("Expected Checkpoint, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_variant_is_an_error() {
        let result: Result<AgentAction, _> =
            serde_json::from_str(r#"{"action":"hover","selector":"a","reason":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_reason_is_an_error() {
        let result: Result<AgentAction, _> =
            serde_json::from_str(r#"{"action":"click","selector":"a"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_defaults_to_checked() {
        let action: AgentAction =
            serde_json::from_str(r##"{"action":"check","selector":"#terms","reason":"agree"}"##)
                .unwrap();
        assert!(matches!(action, AgentAction::Check { checked: true, .. }));
    }

    #[test]
    fn test_checkpoint_response_wire_format() {
        let response: CheckpointResponse = serde_json::from_str(
            r#"{"continue":true,"reply":{"kind":"questions","answers":{"Salary?":"Negotiable"}}}"#,
        )
        .unwrap();
        assert!(response.proceed);
        match response.reply {
            Some(CheckpointReply::Questions { answers }) => {
                assert_eq!(answers.get("Salary?").map(String::as_str), Some("Negotiable"));
            }
            other => panic!("Expected Questions reply, got {:?}", other),
        }

        let bare: CheckpointResponse = serde_json::from_str(r#"{"continue":false}"#).unwrap();
        assert_eq!(bare, CheckpointResponse::cancel());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "me@example.com".into(),
            password: "hunter2".into(),
        };
        let text = format!("{:?}", creds);
        assert!(text.contains("me@example.com"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_result_serializes_duration_in_millis() {
        let result = ApplyJobResult {
            success: false,
            outcome: Outcome::TimedOut,
            confirmation_url: None,
            confirmation_id: None,
            message: "step budget exhausted".into(),
            steps: 50,
            screenshots: Vec::new(),
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["durationMs"], 1500);
        assert_eq!(json["outcome"], "timed_out");
    }
}
