// ── Health domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Who is affected when a check is abnormal.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum OccupantImpact {
    #[default]
    Unspecified,
    NoOccupantImpact,
    Comfort,
    Health,
    LifeSafety,
    Security,
}

/// What happens to the equipment when a check is abnormal.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum EquipmentImpact {
    #[default]
    Unspecified,
    NoEquipmentImpact,
    Function,
    Lifespan,
}

/// Derived from the fault set: `Abnormal` iff at least one fault is current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Normality {
    #[default]
    Normal,
    Abnormal,
}

impl Normality {
    pub fn is_normal(self) -> bool {
        matches!(self, Self::Normal)
    }
}

/// Connectivity / response quality of the thing behind a check.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ReliabilityState {
    #[default]
    Unknown,
    Ok,
    Unreliable,
    NoResponse,
    BadResponse,
    ConnTransientFailure,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultSeverity {
    #[default]
    Unspecified,
    Info,
    Warning,
    Critical,
}

/// Last reported reliability, with the error that caused it if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reliability {
    pub state: ReliabilityState,
    pub last_error: Option<String>,
}

impl Reliability {
    pub fn new(state: ReliabilityState) -> Self {
        Self {
            state,
            last_error: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(ReliabilityState::Ok)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// One ongoing problem, identified by a stable `code`.
///
/// `first_seen_time` and `update_time` are owned by the check: values passed
/// in by callers are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub code: String,
    pub summary_text: String,
    pub details_text: String,
    pub severity: FaultSeverity,
    pub first_seen_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Fault {
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary_text: summary.into(),
            ..Self::default()
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details_text = details.into();
        self
    }

    pub fn with_severity(mut self, severity: FaultSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub(crate) fn same_content(&self, other: &Self) -> bool {
        self.summary_text == other.summary_text
            && self.details_text == other.details_text
            && self.severity == other.severity
    }
}

/// Lets a full `Fault` stand in for its code in `remove_fault`.
impl AsRef<str> for Fault {
    fn as_ref(&self) -> &str {
        &self.code
    }
}

/// How a fault's `update_time` reacts to an update with the same code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordTimePolicy {
    /// Advance whenever summary, details or severity change.
    #[default]
    OnContentChange,
    /// Keep the earlier time while severity is unchanged.
    KeepWhileSameSeverity,
}

/// Static description of a check, supplied at configuration time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub occupant_impact: OccupantImpact,
    #[serde(default)]
    pub equipment_impact: EquipmentImpact,
    #[serde(default)]
    pub record_time_policy: RecordTimePolicy,
}

impl CheckDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_impact(mut self, occupant: OccupantImpact, equipment: EquipmentImpact) -> Self {
        self.occupant_impact = occupant;
        self.equipment_impact = equipment;
        self
    }

    pub fn with_record_time_policy(mut self, policy: RecordTimePolicy) -> Self {
        self.record_time_policy = policy;
        self
    }
}

/// Observable status of one check. This is the value held in the check's
/// cell, so every mutation is visible to `pull` subscribers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Composite `owner:check` id.
    pub id: String,
    pub owner: String,
    pub display_name: String,
    pub description: String,
    pub occupant_impact: OccupantImpact,
    pub equipment_impact: EquipmentImpact,
    pub normality: Normality,
    pub normality_change_time: Option<DateTime<Utc>>,
    pub reliability: Reliability,
    pub reliability_change_time: Option<DateTime<Utc>>,
    /// Current faults in first-seen order, at most one per code.
    pub faults: Vec<Fault>,
}

impl HealthCheck {
    pub(crate) fn refresh_normality(&mut self, now: DateTime<Utc>) {
        let normality = if self.faults.is_empty() {
            Normality::Normal
        } else {
            Normality::Abnormal
        };
        if normality != self.normality {
            self.normality = normality;
            self.normality_change_time = Some(now);
        }
    }

    pub fn fault(&self, code: &str) -> Option<&Fault> {
        self.faults.iter().find(|fault| fault.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_display_in_screaming_case() {
        assert_eq!(ReliabilityState::BadResponse.to_string(), "BAD_RESPONSE");
        assert_eq!(Normality::Abnormal.to_string(), "ABNORMAL");
        assert_eq!(OccupantImpact::LifeSafety.to_string(), "LIFE_SAFETY");
    }

    #[test]
    fn impacts_parse_case_insensitively() {
        assert_eq!(
            "comfort".parse::<OccupantImpact>().ok(),
            Some(OccupantImpact::Comfort)
        );
        assert_eq!(
            "NO_EQUIPMENT_IMPACT".parse::<EquipmentImpact>().ok(),
            Some(EquipmentImpact::NoEquipmentImpact)
        );
    }

    #[test]
    fn refresh_normality_tracks_fault_set() {
        let now = Utc::now();
        let mut status = HealthCheck::default();
        status.faults.push(Fault::new("x", "y"));
        status.refresh_normality(now);
        assert_eq!(status.normality, Normality::Abnormal);
        assert_eq!(status.normality_change_time, Some(now));

        status.faults.clear();
        status.refresh_normality(now);
        assert!(status.normality.is_normal());
    }
}
