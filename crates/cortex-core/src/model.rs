//! The memory record envelope and its six kind-specific payloads.
//!
//! Every record shares one envelope; kind-specific fields live in
//! `KindData`. `context` is modeled as a mapping everywhere (see the Open
//! Question resolution in DESIGN.md), represented here as a
//! `serde_json::Map` so engines can deep-merge it without inventing their
//! own tagged-value union.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The six memory kinds. `Session` covers both session messages and
/// session summaries; which sub-shape a record carries is determined by
/// the `KindData::SessionMessage`/`KindData::SessionSummary` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Factual,
    Episodic,
    Semantic,
    Procedural,
    Working,
    Session,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 6] = [
        MemoryKind::Factual,
        MemoryKind::Episodic,
        MemoryKind::Semantic,
        MemoryKind::Procedural,
        MemoryKind::Working,
        MemoryKind::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Factual => "factual",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Procedural => "procedural",
            MemoryKind::Working => "working",
            MemoryKind::Session => "session",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An opaque tenant key. Every record is owned by exactly one `UserId`.
pub type UserId = String;

/// An opaque record handle.
pub type MemoryId = String;

pub fn new_id() -> MemoryId {
    Uuid::new_v4().to_string()
}

/// The common envelope shared by every memory kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub user_id: UserId,
    pub kind: MemoryKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub importance: f32,
    pub confidence: f32,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub data: KindData,
}

impl MemoryRecord {
    /// Build a fresh record with server-assigned fields set, ready for an
    /// engine to fill in `content`/`data`/`embedding`.
    pub fn new(user_id: UserId, kind: MemoryKind, content: String, data: KindData) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            user_id,
            kind,
            content,
            embedding: None,
            importance: 0.5,
            confidence: 0.5,
            access_count: 0,
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            context: Map::new(),
            tags: Vec::new(),
            data,
        }
    }

    /// Append to the Factual merge-notes convention: `context["notes"]` is a
    /// single string, entries joined with `"; "` (Open Question resolution).
    pub fn append_note(&mut self, note: &str) {
        let existing = self
            .context
            .get("notes")
            .and_then(Value::as_str)
            .map(str::to_string);
        let combined = match existing {
            Some(prev) if !prev.is_empty() => format!("{prev}; {note}"),
            _ => note.to_string(),
        };
        self.context.insert("notes".into(), Value::String(combined));
    }
}

/// Kind-specific fields, one variant per memory kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KindData {
    Factual(FactualData),
    Episodic(EpisodicData),
    Semantic(SemanticData),
    Procedural(ProceduralData),
    Working(WorkingData),
    SessionMessage(SessionMessageData),
    SessionSummary(SessionSummaryData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Disputed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactualData {
    pub fact_type: String,
    pub subject: String,
    pub predicate: String,
    pub object_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub verification_status: VerificationStatus,
    #[serde(default)]
    pub related_facts: Vec<MemoryId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl DifficultyLevel {
    pub fn parse_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "beginner" => DifficultyLevel::Beginner,
            "advanced" => DifficultyLevel::Advanced,
            "expert" => DifficultyLevel::Expert,
            _ => DifficultyLevel::Intermediate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub number: u32,
    pub description: String,
    #[serde(default)]
    pub importance: f32,
    #[serde(default)]
    pub tools_needed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralData {
    pub skill_type: String,
    pub steps: Vec<ProcedureStep>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    pub difficulty_level: DifficultyLevel,
    pub success_rate: f32,
    /// Running-mean denominator (`n` in `r' = (r*n + ok)/(n+1)`); stored
    /// here since the envelope has no dedicated field for it.
    pub success_reps: u32,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicData {
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    pub emotional_valence: f32,
    pub vividness: f32,
    pub episode_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbstractionLevel {
    Concrete,
    Medium,
    Abstract,
}

impl AbstractionLevel {
    pub fn parse_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "concrete" => AbstractionLevel::Concrete,
            "abstract" => AbstractionLevel::Abstract,
            _ => AbstractionLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticData {
    pub concept_type: String,
    pub definition: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub abstraction_level: AbstractionLevel,
    pub category: String,
    #[serde(default)]
    pub related_concepts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingData {
    pub task_id: String,
    #[serde(default)]
    pub task_context: Map<String, Value>,
    pub ttl_seconds: i64,
    pub priority: u8,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessageData {
    pub session_id: String,
    pub role: String,
    pub message_type: String,
    pub message_metadata: Value,
    pub is_summary_candidate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummaryData {
    pub session_id: String,
    pub conversation_summary: String,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    pub total_messages: u64,
    pub messages_since_last_summary: u64,
    pub last_summary_at: DateTime<Utc>,
    pub session_metadata: Value,
}

/// The outcome of a write operation (store/update/delete): `success`,
/// `operation`, `message`, and optional `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub success: bool,
    pub operation: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MemoryId>,
}

impl OpResult {
    pub fn ok(operation: impl Into<String>, id: MemoryId) -> Self {
        Self {
            success: true,
            operation: operation.into(),
            message: "ok".to_string(),
            data: Some(id),
        }
    }

    pub fn ok_noop(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            operation: operation.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            operation: operation.into(),
            message: message.into(),
            data: None,
        }
    }
}

/// Deep-merge `patch` into `base`: object keys merge recursively, arrays and
/// scalars replace.
pub fn deep_merge(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, patch_value) in patch {
        match (base.get_mut(key), patch_value) {
            (Some(Value::Object(base_obj)), Value::Object(patch_obj)) => {
                deep_merge(base_obj, patch_obj);
            }
            _ => {
                base.insert(key.clone(), patch_value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_note_joins_with_semicolon() {
        let mut r = MemoryRecord::new(
            "u1".into(),
            MemoryKind::Factual,
            "c".into(),
            KindData::Factual(FactualData {
                fact_type: "t".into(),
                subject: "s".into(),
                predicate: "p".into(),
                object_value: "o".into(),
                source: None,
                verification_status: VerificationStatus::Unverified,
                related_facts: vec![],
            }),
        );
        r.append_note("first");
        r.append_note("second");
        assert_eq!(
            r.context.get("notes").unwrap().as_str().unwrap(),
            "first; second"
        );
    }

    #[test]
    fn deep_merge_recurses_objects_and_replaces_scalars() {
        let mut base = json!({"a": 1, "nested": {"x": 1, "y": 2}}).as_object().unwrap().clone();
        let patch = json!({"a": 2, "nested": {"y": 3, "z": 4}}).as_object().unwrap().clone();
        deep_merge(&mut base, &patch);
        assert_eq!(base["a"], json!(2));
        assert_eq!(base["nested"]["x"], json!(1));
        assert_eq!(base["nested"]["y"], json!(3));
        assert_eq!(base["nested"]["z"], json!(4));
    }
}
