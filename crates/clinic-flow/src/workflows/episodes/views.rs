use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    Episode, EpisodeId, EpisodeRecords, EpisodeState, InstitutionId, LabResult, PatientId,
    ProfessionalId, TestResult,
};
use super::urgency::{urgency_for, SlaStage, SlaTable, UrgencyTier};
use crate::workflows::eligibility::BypassAssessment;

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneView {
    pub state: EpisodeState,
    pub state_label: &'static str,
    pub reached_at: DateTime<Utc>,
}

/// Outward representation of an episode with its derived urgency.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeView {
    pub id: EpisodeId,
    pub code: String,
    pub title: String,
    pub patient_id: PatientId,
    pub institution_id: InstitutionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsible_professional: Option<ProfessionalId>,
    pub state: EpisodeState,
    pub state_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_stage: Option<SlaStage>,
    pub urgency: UrgencyTier,
    pub urgency_label: &'static str,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub milestones: Vec<MilestoneView>,
    pub version: u64,
}

impl EpisodeView {
    pub fn build(episode: &Episode, sla: &SlaTable, now: DateTime<Utc>) -> Self {
        let urgency = urgency_for(episode.state, episode.entered_current_state_at(), now, sla);
        Self {
            id: episode.id.clone(),
            code: episode.code.clone(),
            title: episode.title.clone(),
            patient_id: episode.patient_id.clone(),
            institution_id: episode.institution_id.clone(),
            responsible_professional: episode.responsible_professional.clone(),
            state: episode.state,
            state_label: episode.state.label(),
            sla_stage: SlaStage::for_state(episode.state),
            urgency,
            urgency_label: urgency.label(),
            created_at: episode.created_at,
            closed_at: episode.closed_at,
            notes: episode.notes.clone(),
            milestones: episode
                .milestones
                .iter()
                .map(|milestone| MilestoneView {
                    state: milestone.state,
                    state_label: milestone.state.label(),
                    reached_at: milestone.reached_at,
                })
                .collect(),
            version: episode.version,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EpisodeDetailView {
    pub episode: EpisodeView,
    pub records: EpisodeRecords,
}

/// Episode after a command together with the record it produced.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome<T> {
    pub episode: EpisodeView,
    pub record: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResultOutcome {
    pub episode: EpisodeView,
    pub test_result: TestResult,
    /// Advisory only; the episode is never moved automatically.
    pub bypass_suggested: bool,
    pub assessment: BypassAssessment,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabResultOutcome {
    pub episode: EpisodeView,
    pub lab_result: LabResult,
    pub patient_notified: bool,
}
