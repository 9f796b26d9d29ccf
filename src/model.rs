use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Unix milliseconds (UTC). Every instant inside the engine uses this type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` for empty or inverted intervals.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Same duration, starting at `start`.
    pub fn shifted_to(&self, start: Ms) -> Span {
        Span {
            start,
            end: start + self.duration_ms(),
        }
    }
}

// ── Boundary time conversion ─────────────────────────────────────

/// Parse an RFC3339 timestamp (any offset) into UTC milliseconds.
pub fn parse_rfc3339_ms(s: &str) -> Result<Ms, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.timestamp_millis())
}

/// Format UTC milliseconds as RFC3339 with a `Z` suffix.
pub fn format_rfc3339(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}

// ── Priority ─────────────────────────────────────────────────────

/// Ordinal priority tier. `P1` is the highest; lower numbers sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Priority(u8);

impl Priority {
    pub const P1: Priority = Priority(1);
    pub const P2: Priority = Priority(2);
    pub const P3: Priority = Priority(3);

    pub fn new(tier: u8) -> Option<Self> {
        (tier >= 1).then_some(Self(tier))
    }

    pub fn tier(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('P')
            .or_else(|| s.strip_prefix('p'))
            .ok_or_else(|| format!("bad priority: {s} (expected P<n>)"))?;
        let tier: u8 = digits
            .parse()
            .map_err(|_| format!("bad priority: {s} (expected P<n>)"))?;
        Priority::new(tier).ok_or_else(|| format!("bad priority: {s} (tiers start at P1)"))
    }
}

impl TryFrom<String> for Priority {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Priority> for String {
    fn from(p: Priority) -> String {
        p.to_string()
    }
}

// ── Task / Engineer ──────────────────────────────────────────────

/// Informational only; the engine never reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("bad status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub priority: Priority,
    /// `None` while the task sits in the unassigned pool.
    pub engineer_id: Option<String>,
    pub span: Span,
    pub status: TaskStatus,
    pub title: Option<String>,
    pub description: Option<String>,
    pub customer_id: Option<String>,
    pub location_id: Option<String>,
    pub timezone: Option<String>,
    pub country: Option<String>,
}

impl Task {
    /// A pending task with no descriptive fields.
    pub fn new(id: impl Into<String>, priority: Priority, span: Span) -> Self {
        Self {
            id: id.into(),
            priority,
            engineer_id: None,
            span,
            status: TaskStatus::Pending,
            title: None,
            description: None,
            customer_id: None,
            location_id: None,
            timezone: None,
            country: None,
        }
    }

    pub fn assigned_to(mut self, engineer_id: impl Into<String>) -> Self {
        self.engineer_id = Some(engineer_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engineer {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl Engineer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            specialization: None,
            region: None,
        }
    }
}

/// One engineer's schedule. `tasks` is kept sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct EngineerTimeline {
    pub engineer: Engineer,
    /// Bumped on every commit that touches this timeline.
    pub version: u64,
    pub tasks: Vec<Task>,
}

impl EngineerTimeline {
    pub fn new(engineer: Engineer) -> Self {
        Self {
            engineer,
            version: 0,
            tasks: Vec::new(),
        }
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Swap in a whole new task set and bump the version.
    pub fn replace_tasks(&mut self, mut tasks: Vec<Task>) {
        tasks.sort_by(|a, b| a.span.start.cmp(&b.span.start).then_with(|| a.id.cmp(&b.id)));
        self.tasks = tasks;
        self.version += 1;
    }
}

// ── Requests / results ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationRequest {
    pub task_id: String,
    pub span: Span,
    pub engineer_id: Option<String>,
    pub timezone: Option<String>,
    pub country: Option<String>,
}

impl RelocationRequest {
    pub fn new(task_id: impl Into<String>, span: Span) -> Self {
        Self {
            task_id: task_id.into(),
            span,
            engineer_id: None,
            timezone: None,
            country: None,
        }
    }

    pub fn to_engineer(mut self, engineer_id: impl Into<String>) -> Self {
        self.engineer_id = Some(engineer_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationResult {
    pub task: Task,
    /// Neighbours moved by the cascade, with their new spans.
    pub shifted: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshuffleResult {
    pub engineer_id: String,
    pub version: u64,
    /// The engineer's full task set after the reshuffle, sorted by start.
    pub tasks: Vec<Task>,
    /// Ids of previously scheduled tasks whose span changed.
    pub shifted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    Overlap { first: String, second: String },
    Blackout { task_id: String, blackout: Span },
}

/// Committed change, broadcast per engineer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    EngineerRegistered {
        engineer_id: String,
    },
    TaskInserted {
        engineer_id: String,
        task_id: String,
        version: u64,
        shifted: Vec<String>,
    },
    TaskRelocated {
        task_id: String,
        from_engineer: Option<String>,
        to_engineer: Option<String>,
        shifted: Vec<String>,
    },
    TaskRemoved {
        engineer_id: Option<String>,
        task_id: String,
    },
    /// A task entered the unassigned pool.
    TaskParked {
        task_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, start: Ms, end: Ms) -> Task {
        Task::new(id, Priority::P2, Span::new(start, end))
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_shift_keeps_duration() {
        let s = Span::new(100, 250).shifted_to(1000);
        assert_eq!(s, Span::new(1000, 1150));
    }

    #[test]
    fn span_try_new_rejects_empty() {
        assert!(Span::try_new(5, 5).is_none());
        assert!(Span::try_new(6, 5).is_none());
        assert!(Span::try_new(5, 6).is_some());
    }

    #[test]
    fn priority_parse_and_order() {
        let p1: Priority = "P1".parse().unwrap();
        let p3: Priority = "p3".parse().unwrap();
        assert_eq!(p1, Priority::P1);
        assert!(p1 < p3);
        assert_eq!(Priority::new(12).unwrap().to_string(), "P12");
        assert!("P0".parse::<Priority>().is_err());
        assert!("high".parse::<Priority>().is_err());
    }

    #[test]
    fn priority_serde_uses_label() {
        let json = serde_json::to_string(&Priority::P2).unwrap();
        assert_eq!(json, "\"P2\"");
        let back: Priority = serde_json::from_str("\"P7\"").unwrap();
        assert_eq!(back.tier(), 7);
    }

    #[test]
    fn status_parse() {
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn rfc3339_round_trip_is_utc() {
        let ms = parse_rfc3339_ms("2024-03-04T12:00:00+05:30").unwrap();
        assert_eq!(format_rfc3339(ms), "2024-03-04T06:30:00.000Z");
        assert!(parse_rfc3339_ms("1709553600000").is_err());
    }

    #[test]
    fn timeline_replace_bumps_version() {
        let mut tl = EngineerTimeline::new(Engineer::new("E1"));
        tl.replace_tasks(vec![task("b", 500, 600), task("a", 100, 200)]);
        assert_eq!(tl.version, 1);
        assert_eq!(tl.tasks[0].id, "a");
        assert!(tl.get_task("a").is_some());
        tl.replace_tasks(vec![task("b", 500, 600)]);
        assert_eq!(tl.version, 2);
        assert!(tl.get_task("a").is_none());
    }
}
