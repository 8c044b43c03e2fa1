use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::EpisodeState;

/// Turnaround thresholds, in hours unless the field says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaTable {
    pub psych_to_physician_hours: u32,
    pub order_to_extraction_hours: u32,
    pub extraction_to_results_days: u32,
    pub report_hours: u32,
}

impl Default for SlaTable {
    fn default() -> Self {
        Self {
            psych_to_physician_hours: 48,
            order_to_extraction_hours: 72,
            extraction_to_results_days: 5,
            report_hours: 24,
        }
    }
}

impl SlaTable {
    /// Reads an institution's SLA bundle; missing or malformed keys keep their defaults.
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: u32| {
            value
                .get(key)
                .and_then(Value::as_u64)
                .and_then(|raw| u32::try_from(raw).ok())
                .unwrap_or(fallback)
        };

        Self {
            psych_to_physician_hours: read(
                "psych_to_physician_hours",
                defaults.psych_to_physician_hours,
            ),
            order_to_extraction_hours: read(
                "order_to_extraction_hours",
                defaults.order_to_extraction_hours,
            ),
            extraction_to_results_days: read(
                "extraction_to_results_days",
                defaults.extraction_to_results_days,
            ),
            report_hours: read("report_hours", defaults.report_hours),
        }
    }

    pub fn allowance(&self, stage: SlaStage) -> Duration {
        match stage {
            SlaStage::PhysicianConsult => Duration::hours(self.psych_to_physician_hours.into()),
            SlaStage::Extraction => Duration::hours(self.order_to_extraction_hours.into()),
            SlaStage::Laboratory => Duration::days(self.extraction_to_results_days.into()),
            SlaStage::Report => Duration::hours(self.report_hours.into()),
        }
    }
}

/// Operational stage an open episode is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStage {
    PhysicianConsult,
    Extraction,
    Laboratory,
    Report,
}

impl SlaStage {
    pub const fn for_state(state: EpisodeState) -> Option<Self> {
        match state {
            EpisodeState::Created
            | EpisodeState::PsychEvalInProgress
            | EpisodeState::ReferredToPhysician => Some(Self::PhysicianConsult),
            EpisodeState::LabOrderIssued => Some(Self::Extraction),
            EpisodeState::ExtractionScheduled
            | EpisodeState::SamplesInTransit
            | EpisodeState::LabAnalysisInProgress => Some(Self::Laboratory),
            EpisodeState::Closed => None,
            _ => Some(Self::Report),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::PhysicianConsult => "Physician consult",
            Self::Extraction => "Extraction",
            Self::Laboratory => "Laboratory",
            Self::Report => "Report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyTier {
    Green,
    Amber,
    Red,
}

impl UrgencyTier {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Green => "On time",
            Self::Amber => "At risk",
            Self::Red => "Overdue",
        }
    }
}

/// Derives the urgency tier from time spent in the current state.
pub fn urgency_for(
    state: EpisodeState,
    entered_at: DateTime<Utc>,
    now: DateTime<Utc>,
    sla: &SlaTable,
) -> UrgencyTier {
    let Some(stage) = SlaStage::for_state(state) else {
        return UrgencyTier::Green;
    };

    let elapsed = now - entered_at;
    let allowed = sla.allowance(stage);
    // Amber up to 1.5x the allowance.
    let grace = allowed + allowed / 2;

    if elapsed <= allowed {
        UrgencyTier::Green
    } else if elapsed <= grace {
        UrgencyTier::Amber
    } else {
        UrgencyTier::Red
    }
}
