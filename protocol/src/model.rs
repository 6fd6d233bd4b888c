use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use uuid::Uuid;

/// Six lowercase ASCII letters identifying a live session (`^[a-z]{6}$`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct SessionCode(String);

impl SessionCode {
    pub const LEN: usize = 6;

    /// Uniform random code. Collision handling is the caller's job.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let code: String = (0..Self::LEN)
            .map(|_| rng.random_range(b'a'..=b'z') as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSessionCode(pub String);

impl fmt::Display for InvalidSessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid session code: {:?}", self.0)
    }
}

impl std::error::Error for InvalidSessionCode {}

impl FromStr for SessionCode {
    type Err = InvalidSessionCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == Self::LEN && s.bytes().all(|b| b.is_ascii_lowercase()) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidSessionCode(s.to_string()))
        }
    }
}

impl TryFrom<String> for SessionCode {
    type Error = InvalidSessionCode;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Opaque identifier for a connected endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(Uuid);

impl EndpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Random 128-bit hex string issued on join and required for reconnects.
pub fn generate_reconnect_token() -> String {
    use fmt::Write as _;
    let bytes: [u8; 16] = rand::rng().random();
    let mut token = String::with_capacity(32);
    for b in bytes {
        let _ = write!(token, "{b:02x}");
    }
    token
}

/// Languages the code executor can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CodeLanguage {
    Javascript,
    Python,
}

impl FromStr for CodeLanguage {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "javascript" | "js" => Ok(Self::Javascript),
            "python" | "python3" => Ok(Self::Python),
            _ => Err(()),
        }
    }
}

/// Coarse progress classification produced by the evaluator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ProgressLabel {
    #[default]
    NotStarted,
    JustStarted,
    HalfwayDone,
    AlmostDone,
    AllDone,
}

/// Evaluator output for one student draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub progress: ProgressLabel,
    pub feedback: String,
}

impl Default for Summary {
    /// Fallback when the evaluator is unavailable or returns junk.
    fn default() -> Self {
        Self {
            progress: ProgressLabel::NotStarted,
            feedback: "Please start".to_string(),
        }
    }
}

/// Outcome of the most recent `execute-code` from a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One unit of the deck; may or may not carry a coding task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub has_coding_task: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub joined_at: DateTime<Utc>,
    /// Last received draft, last-writer-wins.
    #[serde(default)]
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_endpoint_id: Option<EndpointId>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub reconnect_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_execution: Option<ExecutionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnected_at: Option<DateTime<Utc>>,
}

impl Student {
    pub fn new(endpoint: EndpointId, now: DateTime<Utc>) -> Self {
        Self {
            joined_at: now,
            code: String::new(),
            socket_endpoint_id: Some(endpoint),
            last_active: now,
            reconnect_token: generate_reconnect_token(),
            summary: None,
            last_execution: None,
            disconnected_at: None,
            reconnected_at: None,
        }
    }
}

/// The authoritative session document. One per session code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDoc {
    pub code: SessionCode,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Editor language hint, free-form (only `javascript`/`python` execute).
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub initial_code: String,
    /// The teacher's live scratchpad.
    #[serde(default)]
    pub current_code: String,
    #[serde(default)]
    pub slides: Vec<Slide>,
    #[serde(default)]
    pub current_slide: usize,
    /// Cached indices of slides with coding tasks, provided by the slide
    /// editor for fast lookup. `None` means derive from `slides`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slides_with_code: Option<Vec<usize>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active: bool,
    #[serde(default)]
    pub students: HashMap<String, Student>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teacher_endpoint_id: Option<EndpointId>,
}

impl SessionDoc {
    pub fn new(
        code: SessionCode,
        title: String,
        description: String,
        language: String,
        initial_code: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            code,
            title,
            description,
            language,
            current_code: initial_code.clone(),
            initial_code,
            slides: Vec::new(),
            current_slide: 0,
            slides_with_code: None,
            created_at: now,
            updated_at: now,
            active: true,
            students: HashMap::new(),
            teacher_endpoint_id: None,
        }
    }

    /// Whether the slide at `index` carries a coding task. Out-of-range
    /// indices and empty decks answer `false`.
    pub fn has_coding_task(&self, index: usize) -> bool {
        if let Some(cached) = &self.slides_with_code {
            return cached.contains(&index);
        }
        self.slides
            .get(index)
            .map(|slide| slide.has_coding_task)
            .unwrap_or(false)
    }

    /// Prompt text for the slide at `index`, empty when missing.
    pub fn slide_prompt(&self, index: usize) -> String {
        self.slides
            .get(index)
            .map(|slide| slide.prompt.clone())
            .unwrap_or_default()
    }

    /// True iff `index` addresses an existing slide, or is 0 on an empty deck.
    pub fn is_valid_slide_index(&self, index: usize) -> bool {
        index < self.slides.len() || (index == 0 && self.slides.is_empty())
    }

    /// Copy of the document with per-student reconnect tokens blanked, safe
    /// to put on the wire.
    pub fn sanitized(&self) -> Self {
        let mut doc = self.clone();
        for student in doc.students.values_mut() {
            student.reconnect_token = String::new();
        }
        doc
    }
}
