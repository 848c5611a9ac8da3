use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const CURRENT_STATE_VERSION: u32 = 3;

pub const ZOOM_MIN: f64 = 0.5;
pub const ZOOM_MAX: f64 = 2.0;
pub const DEFAULT_ZOOM: f64 = 1.0;
pub const SIDEBAR_WIDTH_MIN: f64 = 200.0;
pub const SIDEBAR_WIDTH_MAX: f64 = 400.0;
pub const DEFAULT_SIDEBAR_WIDTH: f64 = 260.0;

pub const DEFAULT_TASK_TITLE: &str = "New Task";
pub const INBOX_KEY: &str = "inbox";

pub type PersonId = String;

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─── Tasks ───────────────────────────────────────────────────────────────

/// Column a task lives in: a calendar day or the undated inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DateKey {
    Inbox,
    Day(NaiveDate),
}

impl DateKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed == INBOX_KEY {
            return Some(Self::Inbox);
        }
        // Keys written from full timestamps still carry the date in the first 10 chars.
        let date_part = trimmed.get(..10).unwrap_or(trimmed);
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok().map(Self::Day)
    }

    pub fn is_inbox(&self) -> bool {
        matches!(self, Self::Inbox)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbox => f.write_str(INBOX_KEY),
            Self::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
        }
    }
}

impl TryFrom<String> for DateKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid date key '{}'", value))
    }
}

impl From<DateKey> for String {
    fn from(value: DateKey) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    #[serde(alias = "maybe")]
    Todo,
    InProgress,
    Done,
    Missed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Missed => "missed",
        }
    }

    /// Accepts both the current value set and the older `todo/done/missed/maybe` one.
    pub fn from_legacy(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "todo" | "maybe" => Some(Self::Todo),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "missed" => Some(Self::Missed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    #[serde(alias = "high")]
    P1,
    #[serde(alias = "medium")]
    P2,
    #[default]
    #[serde(alias = "low")]
    P3,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::P1 => "p1",
            Self::P2 => "p2",
            Self::P3 => "p3",
        }
    }

    pub fn from_legacy(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "p1" | "high" => Some(Self::P1),
            "p2" | "medium" => Some(Self::P2),
            "p3" | "low" => Some(Self::P3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    #[default]
    Work,
    Personal,
}

impl TaskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "work" => Some(Self::Work),
            "personal" => Some(Self::Personal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    /// Rich-text HTML body.
    pub content: String,
    pub date: DateKey,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub category: TaskCategory,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn placeholder(date: DateKey, category: TaskCategory) -> Self {
        Self {
            id: generate_id(),
            title: DEFAULT_TASK_TITLE.to_string(),
            content: String::new(),
            date,
            status: TaskStatus::Todo,
            priority: TaskPriority::P3,
            category,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<TaskCategory>,
}

impl TaskPatch {
    pub fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(content) = &self.content {
            task.content = content.clone();
        }
        if let Some(date) = self.date {
            task.date = date;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

// ─── Goals ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub title: String,
    /// HTML.
    pub description: String,
    pub color: String,
    /// 0–100.
    pub progress: u8,
    pub start_date: String,
    pub end_date: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "sort_order")]
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(rename = "sort_order", skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl GoalPatch {
    pub fn apply(&self, goal: &mut Goal) {
        if let Some(title) = &self.title {
            goal.title = title.clone();
        }
        if let Some(description) = &self.description {
            goal.description = description.clone();
        }
        if let Some(color) = &self.color {
            goal.color = color.clone();
        }
        if let Some(progress) = self.progress {
            goal.progress = progress.min(100);
        }
        if let Some(start_date) = &self.start_date {
            goal.start_date = start_date.clone();
        }
        if let Some(end_date) = &self.end_date {
            goal.end_date = end_date.clone();
        }
        if let Some(sort_order) = self.sort_order {
            goal.sort_order = sort_order;
        }
    }
}

// ─── People and 1:1 notes ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub avatar_color: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl PersonPatch {
    pub fn apply(&self, person: &mut Person) {
        if let Some(name) = &self.name {
            person.name = name.clone();
        }
        if let Some(avatar_color) = &self.avatar_color {
            person.avatar_color = avatar_color.clone();
        }
        if let Some(sort_order) = self.sort_order {
            person.sort_order = sort_order;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneOnOneItem {
    pub id: String,
    pub person_id: PersonId,
    pub content: String,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneOnOnePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
}

impl OneOnOnePatch {
    pub fn apply(&self, item: &mut OneOnOneItem) {
        if let Some(content) = &self.content {
            item.content = content.clone();
        }
        if let Some(is_completed) = self.is_completed {
            item.is_completed = is_completed;
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub zoom: f64,
    pub sidebar_open: bool,
    pub sidebar_width: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            sidebar_open: true,
            sidebar_width: DEFAULT_SIDEBAR_WIDTH,
        }
    }
}

pub fn clamp_zoom(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(ZOOM_MIN, ZOOM_MAX)
    } else {
        DEFAULT_ZOOM
    }
}

pub fn clamp_sidebar_width(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(SIDEBAR_WIDTH_MIN, SIDEBAR_WIDTH_MAX)
    } else {
        DEFAULT_SIDEBAR_WIDTH
    }
}

// ─── Meeting hub ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingType {
    #[default]
    Normal,
    Discovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceCategory {
    #[default]
    Tech,
    Architecture,
    Leadership,
    Client,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeetingInsight {
    pub summary: String,
    pub participants: Vec<String>,
    pub key_learnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_ups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_questions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_requests: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_signals: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingRecord {
    pub id: String,
    pub title: String,
    pub date: String,
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub meeting_type: MeetingType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insight: Option<MeetingInsight>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceNotePage {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSpace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: SpaceCategory,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub records: Vec<MeetingRecord>,
    #[serde(default)]
    pub space_notes: Vec<SpaceNotePage>,
}

// ─── Health ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabFlag {
    H,
    L,
    HH,
    LL,
    #[serde(rename = "CRIT")]
    Crit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabValue {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<LabFlag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthSource {
    Pdf,
    Image,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodWorkRecord {
    pub id: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_name: Option<String>,
    pub source_type: HealthSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_name: Option<String>,
    #[serde(default)]
    pub lab_values: Vec<LabValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_flags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkoutType {
    Run,
    Treadmill,
    Bike,
    Walk,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutRecord {
    pub id: String,
    pub date: String,
    #[serde(rename = "type", default)]
    pub workout_type: WorkoutType,
    /// Kilometres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    pub source_type: HealthSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonalProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    /// Pounds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Centimetres.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthData {
    pub blood_work_records: Vec<BloodWorkRecord>,
    pub workout_records: Vec<WorkoutRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_profile: Option<PersonalProfile>,
}

// ─── Remote-only log rows ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptLog {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub user_input: String,
    pub ai_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiLogEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub user_message: String,
    pub ai_message: String,
    pub metadata: Option<serde_json::Value>,
}

// ─── Root aggregate ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub version: u32,
    pub tasks: Vec<Task>,
    pub people: Vec<Person>,
    pub one_on_ones: BTreeMap<PersonId, Vec<OneOnOneItem>>,
    pub goals: Vec<Goal>,
    pub settings: Settings,
    #[serde(default)]
    pub meeting_spaces: Vec<MeetingSpace>,
    #[serde(default)]
    pub health: HealthData,
    #[serde(default)]
    pub hydrated: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: CURRENT_STATE_VERSION,
            tasks: Vec::new(),
            people: Vec::new(),
            one_on_ones: BTreeMap::new(),
            goals: Vec::new(),
            settings: Settings::default(),
            meeting_spaces: Vec::new(),
            health: HealthData::default(),
            hydrated: false,
        }
    }
}

/// Rows read back from the remote store at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub tasks: Vec<Task>,
    pub goals: Vec<Goal>,
    pub people: Vec<Person>,
    pub one_on_ones: Vec<OneOnOneItem>,
}
