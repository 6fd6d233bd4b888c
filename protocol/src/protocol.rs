//! Defines the realtime protocol between classroom endpoints and the server.
//!
//! Inbound [`ClientOp`] values mutate session state; outbound [`ServerEvent`]
//! values fan out to the caller, the teachers, or the whole room depending on
//! the event.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::model::SessionDoc;
use crate::model::Slide;
use crate::model::Summary;

/// Inbound operation from a connected endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
#[non_exhaustive]
pub enum ClientOp {
    /// A student joins (or rejoins under a fresh identity) a session.
    JoinSession { code: String, name: String },

    /// A teacher joins a session and starts driving it.
    TeacherJoin { code: String, name: String },

    /// A student re-attaches within the disconnect grace window. Requires the
    /// token issued with the original `session-data`.
    ReconnectSession {
        code: String,
        name: String,
        token: String,
    },

    /// Live draft update. From a student this is last-writer-wins on their
    /// record; from a teacher it updates the session scratchpad.
    CodeUpdate { code: String },

    /// Teacher navigates the deck.
    UpdateSlide { slide_index: i64 },

    /// Teacher replaces the deck, optionally with a precomputed list of
    /// slide indices carrying coding tasks.
    UpdateSlideData {
        slides: Vec<Slide>,
        #[serde(default)]
        slides_with_code: Option<Vec<usize>>,
    },

    /// Run a submission in the sandbox. `language` defaults to the session's
    /// configured language when omitted.
    ExecuteCode {
        code: String,
        #[serde(default)]
        language: Option<String>,
    },

    /// Explicit leave. Endpoint drops are treated identically.
    Disconnect,
}

/// Outbound event from the server.
#[derive(Debug, Clone, Deserialize, Serialize, Display, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
#[strum(serialize_all = "kebab-case")]
pub enum ServerEvent {
    /// Point-in-time snapshot of the session document, sent to the caller
    /// after a successful join or reconnect.
    SessionData(SessionDataEvent),

    /// Deck navigation, sent to the whole room.
    SlideChange(SlideChangeEvent),

    /// Someone joined; sent to everyone else in the room.
    UserJoined(UserJoinedEvent),

    /// Someone left; sent to everyone else in the room.
    UserLeft(UserLeftEvent),

    /// A student's draft changed; teachers only.
    StudentCodeUpdate(StudentCodeUpdateEvent),

    /// A fresh evaluator summary for one student; teachers only.
    StudentSummaryUpdate(StudentSummaryUpdateEvent),

    /// Sandbox output for the caller's own `execute-code`.
    ExecutionResult(ExecutionResultEvent),

    /// Mirror of a student's execution outcome; teachers only.
    StudentExecutionResult(StudentExecutionResultEvent),

    /// Replays a reconnecting student's last draft.
    CodeRestore(CodeRestoreEvent),

    /// Request-scoped failure. Never broadcast.
    Error(ErrorEvent),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDataEvent {
    pub session: SessionDoc,
    /// Present for students; authenticates a later `reconnect-session`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlideChangeEvent {
    pub index: usize,
    pub has_code_editor: bool,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinedEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentCodeUpdateEvent {
    pub student_name: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummaryUpdateEvent {
    pub student_name: String,
    pub summary: Summary,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResultEvent {
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentExecutionResultEvent {
    pub student_name: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeRestoreEvent {
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ErrorEvent {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    /// Serialize an event to verify the JSON envelope has the expected
    /// tag and field casing.
    #[test]
    fn serialize_slide_change() {
        let timestamp = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let event = ServerEvent::SlideChange(SlideChangeEvent {
            index: 2,
            has_code_editor: true,
            prompt: "Write a factorial".to_string(),
            timestamp,
        });
        let serialized = serde_json::to_string(&event).unwrap();
        assert_eq!(
            serialized,
            r#"{"type":"slide-change","index":2,"hasCodeEditor":true,"prompt":"Write a factorial","timestamp":"2025-03-01T12:00:00Z"}"#
        );
    }

    #[test]
    fn event_names_match_wire_tags() {
        let event = ServerEvent::Error(ErrorEvent {
            message: "nope".to_string(),
        });
        assert_eq!(event.to_string(), "error");
        let event = ServerEvent::CodeRestore(CodeRestoreEvent {
            code: String::new(),
            timestamp: Utc::now(),
        });
        assert_eq!(event.to_string(), "code-restore");
    }

    #[test]
    fn deserialize_join_session() {
        let op: ClientOp =
            serde_json::from_str(r#"{"type":"join-session","code":"abcdef","name":"Alice"}"#)
                .unwrap();
        assert_eq!(op, ClientOp::JoinSession {
            code: "abcdef".to_string(),
            name: "Alice".to_string(),
        });
    }

    #[test]
    fn deserialize_update_slide_requires_integer() {
        let op: ClientOp =
            serde_json::from_str(r#"{"type":"update-slide","slideIndex":3}"#).unwrap();
        assert_eq!(op, ClientOp::UpdateSlide { slide_index: 3 });

        let err = serde_json::from_str::<ClientOp>(r#"{"type":"update-slide","slideIndex":"3"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn deserialize_execute_code_defaults_language() {
        let op: ClientOp =
            serde_json::from_str(r#"{"type":"execute-code","code":"print(1)"}"#).unwrap();
        assert_eq!(op, ClientOp::ExecuteCode {
            code: "print(1)".to_string(),
            language: None,
        });
    }
}
