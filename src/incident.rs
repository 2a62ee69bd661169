// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Incident data model.
//!
//! The [`Incident`] is the record every backend persists. The replication layer
//! only looks at the GUID, the creation timestamp and the `persistent` flag;
//! everything else is carried through as an opaque JSON payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an incident (serialised as an integer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum IncidentState {
    #[default]
    Unresolved,
    Resolved,
    Monitoring,
    Idle,
}

impl IncidentState {
    /// Lowercase label used by feeds and notifiers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Resolved => "resolved",
            Self::Monitoring => "monitoring",
            Self::Idle => "idle",
        }
    }
}

impl From<IncidentState> for u8 {
    fn from(state: IncidentState) -> Self {
        match state {
            IncidentState::Unresolved => 0,
            IncidentState::Resolved => 1,
            IncidentState::Monitoring => 2,
            IncidentState::Idle => 3,
        }
    }
}

impl TryFrom<u8> for IncidentState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unresolved),
            1 => Ok(Self::Resolved),
            2 => Ok(Self::Monitoring),
            3 => Ok(Self::Idle),
            other => Err(format!("unknown incident state {}", other)),
        }
    }
}

/// Impact on the affected components, ordered from healthy to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ComponentState {
    #[default]
    Operational,
    UnderMaintenance,
    DegradedPerformance,
    PartialOutage,
    MajorOutage,
}

impl ComponentState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operational => "Operational",
            Self::UnderMaintenance => "Under Maintenance",
            Self::DegradedPerformance => "Degraded Performance",
            Self::PartialOutage => "Partial Outage",
            Self::MajorOutage => "Major Outage",
        }
    }
}

impl From<ComponentState> for u8 {
    fn from(state: ComponentState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for ComponentState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Operational),
            1 => Ok(Self::UnderMaintenance),
            2 => Ok(Self::DegradedPerformance),
            3 => Ok(Self::PartialOutage),
            4 => Ok(Self::MajorOutage),
            other => Err(format!("unknown component state {}", other)),
        }
    }
}

/// An affected component, serialised as `"group - name"` or just `"name"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct Component {
    pub group: Option<String>,
    pub name: String,
}

impl Component {
    pub fn new(group: Option<String>, name: impl Into<String>) -> Self {
        Self {
            group,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{} - {}", group, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<Component> for String {
    fn from(component: Component) -> Self {
        component.to_string()
    }
}

impl From<String> for Component {
    fn from(raw: String) -> Self {
        match raw.split_once(" - ") {
            Some((group, name)) => Self {
                group: Some(group.to_string()),
                name: name.to_string(),
            },
            None => Self { group: None, name: raw },
        }
    }
}

/// A status update posted on an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub guid: String,
    pub incident_guid: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub content: String,
}

impl Message {
    /// New message stamped now.
    pub fn new(incident_guid: &str, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            guid: Uuid::new_v4().to_string(),
            incident_guid: incident_guid.to_string(),
            created_at: Utc::now(),
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Free-form key/value attached to an incident by notifiers or operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub incident_guid: String,
    pub key: String,
    pub value: String,
}

impl Metadata {
    pub fn new(incident_guid: &str, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            incident_guid: incident_guid.to_string(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An incident or scheduled maintenance window.
///
/// # Example
///
/// ```
/// use incident_store::{Incident, IncidentState, ComponentState};
///
/// let incident = Incident::new(IncidentState::Unresolved, ComponentState::PartialOutage);
/// assert!(incident.is_new());
/// assert!(!incident.persistent);
/// assert_eq!(incident.guid.len(), 36);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub guid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub state: IncidentState,
    #[serde(default)]
    pub component_state: ComponentState,
    #[serde(default)]
    pub components: Vec<Component>,
    /// Kept newest first by every backend.
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
    #[serde(default)]
    pub is_scheduled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub origin: String,
    /// Always shown, regardless of date range. Excluded from `by_date`.
    #[serde(default)]
    pub persistent: bool,
}

impl Incident {
    /// Create an incident with a fresh GUID and equal created/updated timestamps.
    #[must_use]
    pub fn new(state: IncidentState, component_state: ComponentState) -> Self {
        let now = Utc::now();
        Self {
            guid: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            state,
            component_state,
            components: Vec::new(),
            messages: Vec::new(),
            metadata: Vec::new(),
            is_scheduled: false,
            scheduled_end: None,
            origin: String::new(),
            persistent: false,
        }
    }

    /// The opening message (oldest).
    #[must_use]
    pub fn main_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent update.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.first()
    }

    /// True until the incident is updated for the first time.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.created_at == self.updated_at
    }

    /// Sort messages newest first.
    pub fn sort_messages(&mut self) {
        self.messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

/// Sort a list of incidents by creation time, oldest first.
pub fn sort_by_created(incidents: &mut [Incident]) {
    incidents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

/// Find an incident by GUID.
#[must_use]
pub fn find<'a>(incidents: &'a [Incident], guid: &str) -> Option<&'a Incident> {
    incidents.iter().find(|i| i.guid == guid)
}

/// Drop every incident with the given GUID.
#[must_use]
pub fn without(incidents: Vec<Incident>, guid: &str) -> Vec<Incident> {
    incidents.into_iter().filter(|i| i.guid != guid).collect()
}
