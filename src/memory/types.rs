//! Core record type definitions.
//!
//! Defines the three stored record types ([`Entity`], [`Event`], [`Task`]), the
//! graph edge type ([`Relationship`]), their closed enums, and the create/patch
//! inputs accepted by the store adapters together with their validation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Open, intentionally untyped key/value document attached to every record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

const MAX_NAME_CHARS: usize = 512;
pub const MAX_DESCRIPTION_CHARS: usize = 20_000;

macro_rules! string_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// SQL-compatible string representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$(Self::$variant,)+]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(format!(concat!("unknown ", $what, ": {}"), s)),
                }
            }
        }
    };
}

/// Which store a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Entity,
    Event,
    Task,
}

string_enum!(RecordKind, "record kind", {
    Entity => "entity",
    Event => "event",
    Task => "task",
});

impl RecordKind {
    /// Node label used in the graph store.
    pub fn graph_label(&self) -> &'static str {
        match self {
            Self::Entity => "Entity",
            Self::Event => "Event",
            Self::Task => "Task",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Event,
    Document,
    Concept,
    Task,
}

string_enum!(EntityType, "entity type", {
    Person => "person",
    Organization => "organization",
    Location => "location",
    Event => "event",
    Document => "document",
    Concept => "concept",
    Task => "task",
});

impl EntityType {
    /// Map a free-form label (as produced by an LLM) onto the closed set.
    /// Anything unrecognised becomes [`EntityType::Concept`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "person" | "people" | "contact" | "user" => Self::Person,
            "organization" | "organisation" | "org" | "company" | "team" => Self::Organization,
            "location" | "place" | "city" | "country" => Self::Location,
            "event" | "meeting" => Self::Event,
            "document" | "doc" | "file" | "report" => Self::Document,
            "task" | "action" | "todo" => Self::Task,
            _ => Self::Concept,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Meeting,
    ScreenCapture,
    Audio,
    Document,
    Note,
    Other,
}

string_enum!(EventType, "event type", {
    Meeting => "meeting",
    ScreenCapture => "screen_capture",
    Audio => "audio",
    Document => "document",
    Note => "note",
    Other => "other",
});

/// Task lifecycle status. Any status may follow any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

string_enum!(TaskStatus, "task status", {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Blocked => "blocked",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

string_enum!(TaskPriority, "task priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Urgent => "urgent",
});

impl TaskPriority {
    /// Parse a priority leniently, defaulting to `Medium`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Self::Low,
            "high" | "important" => Self::High,
            "urgent" | "critical" | "asap" => Self::Urgent,
            _ => Self::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Mentions,
    AssignedTo,
    RelatedTo,
    PartOf,
    ParticipatedIn,
    DerivedFrom,
}

string_enum!(RelationshipType, "relationship type", {
    Mentions => "MENTIONS",
    AssignedTo => "ASSIGNED_TO",
    RelatedTo => "RELATED_TO",
    PartOf => "PART_OF",
    ParticipatedIn => "PARTICIPATED_IN",
    DerivedFrom => "DERIVED_FROM",
});

/// A person, organization, place, or concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// UUID v7 primary key.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub description: Option<String>,
    pub metadata: Metadata,
    /// Derived from name + description.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn embedding_text(&self) -> String {
        entity_embedding_text(&self.name, self.description.as_deref())
    }
}

/// An entity taking part in an event, with per-participant metadata (e.g. role).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub entity_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A timestamped observation: a meeting, a screen capture, an audio segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub participants: Vec<Participant>,
    pub source: Option<String>,
    pub source_id: Option<String>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn embedding_text(&self) -> String {
        titled_embedding_text(&self.title, self.description.as_deref())
    }
}

/// An action item derived from an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<String>,
    pub related_event_id: Option<String>,
    pub related_entity_id: Option<String>,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn embedding_text(&self) -> String {
        titled_embedding_text(&self.title, self.description.as_deref())
    }
}

/// A typed, directed graph edge. Re-asserting the same edge bumps `weight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub source_kind: RecordKind,
    pub target_id: String,
    pub target_kind: RecordKind,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub weight: i64,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn entity_embedding_text(name: &str, description: Option<&str>) -> String {
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(desc) => format!("{name}: {desc}"),
        None => name.to_string(),
    }
}

pub(crate) fn titled_embedding_text(title: &str, description: Option<&str>) -> String {
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(desc) => format!("{title}\n{desc}"),
        None => title.to_string(),
    }
}

// ── Inputs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewEntity {
    pub fn new(name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            name: name.into(),
            entity_type,
            description: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        check_required_text(&mut errors, "name", &self.name);
        check_optional_text(&mut errors, "description", self.description.as_deref());
        errors.into_result()
    }
}

/// Partial entity update. `None` fields are left unchanged; `metadata` keys are
/// merged over the existing map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl EntityPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        if let Some(name) = &self.name {
            check_required_text(&mut errors, "name", name);
        }
        check_optional_text(&mut errors, "description", self.description.as_deref());
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewEvent {
    pub fn new(event_type: EventType, title: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            event_type,
            title: title.into(),
            description: None,
            start_time,
            end_time: None,
            participants: Vec::new(),
            source: None,
            source_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        check_required_text(&mut errors, "title", &self.title);
        check_optional_text(&mut errors, "description", self.description.as_deref());
        check_time_range(&mut errors, self.start_time, self.end_time);
        check_participants(&mut errors, &self.participants);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventPatch {
    #[serde(default, rename = "type")]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Replaces the participant list when present.
    #[serde(default)]
    pub participants: Option<Vec<Participant>>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl EventPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        if let Some(title) = &self.title {
            check_required_text(&mut errors, "title", title);
        }
        check_optional_text(&mut errors, "description", self.description.as_deref());
        if let Some(participants) = &self.participants {
            check_participants(&mut errors, participants);
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: TaskPriority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub related_event_id: Option<String>,
    #[serde(default)]
    pub related_entity_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

fn default_priority() -> TaskPriority {
    TaskPriority::Medium
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            due_date: None,
            assignee_id: None,
            related_event_id: None,
            related_entity_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        check_required_text(&mut errors, "title", &self.title);
        check_optional_text(&mut errors, "description", self.description.as_deref());
        check_reference(&mut errors, "assignee_id", self.assignee_id.as_deref());
        check_reference(&mut errors, "related_event_id", self.related_event_id.as_deref());
        check_reference(&mut errors, "related_entity_id", self.related_entity_id.as_deref());
        errors.into_result()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub related_entity_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

impl TaskPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        if let Some(title) = &self.title {
            check_required_text(&mut errors, "title", title);
        }
        check_optional_text(&mut errors, "description", self.description.as_deref());
        check_reference(&mut errors, "assignee_id", self.assignee_id.as_deref());
        check_reference(&mut errors, "related_entity_id", self.related_entity_id.as_deref());
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelationship {
    pub source_id: String,
    pub source_kind: RecordKind,
    pub target_id: String,
    pub target_kind: RecordKind,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewRelationship {
    pub fn new(
        source: (&str, RecordKind),
        relationship_type: RelationshipType,
        target: (&str, RecordKind),
    ) -> Self {
        Self {
            source_id: source.0.to_string(),
            source_kind: source.1,
            target_id: target.0.to_string(),
            target_kind: target.1,
            relationship_type,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        check_required_text(&mut errors, "source_id", &self.source_id);
        check_required_text(&mut errors, "target_id", &self.target_id);
        if !self.source_id.is_empty() && self.source_id == self.target_id {
            errors.push("target_id", "must differ from source_id");
        }
        errors.into_result()
    }
}

// ── Validation helpers ───────────────────────────────────────────────────────

fn check_required_text(errors: &mut ValidationError, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(field, "must not be empty");
    } else if value.chars().count() > MAX_NAME_CHARS {
        errors.push(field, format!("must be at most {MAX_NAME_CHARS} characters"));
    }
}

fn check_optional_text(errors: &mut ValidationError, field: &str, value: Option<&str>) {
    if let Some(v) = value {
        if v.chars().count() > MAX_DESCRIPTION_CHARS {
            errors.push(field, format!("must be at most {MAX_DESCRIPTION_CHARS} characters"));
        }
    }
}

fn check_reference(errors: &mut ValidationError, field: &str, value: Option<&str>) {
    if let Some(v) = value {
        if v.trim().is_empty() {
            errors.push(field, "must not be blank when present");
        }
    }
}

fn check_time_range(
    errors: &mut ValidationError,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) {
    if let Some(end) = end {
        if end < start {
            errors.push("end_time", "must not be before start_time");
        }
    }
}

fn check_participants(errors: &mut ValidationError, participants: &[Participant]) {
    for (i, p) in participants.iter().enumerate() {
        if p.entity_id.trim().is_empty() {
            errors.push(&format!("participants[{i}].entity_id"), "must not be empty");
        }
    }
}
