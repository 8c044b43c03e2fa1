use serde::Serialize;

use super::DashboardSummary;
use crate::workflows::episodes::{
    EpisodeId, EpisodeState, SlaStage, SlaTable, UrgencyTier,
};

#[derive(Debug, Clone, Serialize)]
pub struct StateCountEntry {
    pub state: EpisodeState,
    pub state_label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnaroundEntry {
    pub stage: SlaStage,
    pub stage_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_hours: Option<f64>,
    pub sla_hours: i64,
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub within_sla: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrgencyCountEntry {
    pub tier: UrgencyTier,
    pub tier_label: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlaAlertView {
    pub episode_id: EpisodeId,
    pub code: String,
    pub state: EpisodeState,
    pub state_label: &'static str,
    pub urgency: UrgencyTier,
    pub urgency_label: &'static str,
    pub hours_in_state: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub total: usize,
    pub open: usize,
    pub closed: usize,
    pub states: Vec<StateCountEntry>,
    pub turnaround: Vec<TurnaroundEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_rate_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposals_accepted_pct: Option<f64>,
    pub urgency: Vec<UrgencyCountEntry>,
    pub alerts: Vec<SlaAlertView>,
}

impl DashboardSummary {
    pub fn view(&self, sla: &SlaTable) -> DashboardView {
        let states = EpisodeState::ordered()
            .into_iter()
            .filter_map(|state| {
                self.state_counts.get(&state).map(|count| StateCountEntry {
                    state,
                    state_label: state.label(),
                    count: *count,
                })
            })
            .collect();

        let turnaround = [
            SlaStage::PhysicianConsult,
            SlaStage::Extraction,
            SlaStage::Laboratory,
        ]
        .into_iter()
        .map(|stage| {
            let sla_hours = sla.allowance(stage).num_hours();
            let stats = self.turnaround.get(&stage);
            let average_hours = stats.and_then(|stats| stats.average_hours());
            TurnaroundEntry {
                stage,
                stage_label: stage.label(),
                average_hours,
                sla_hours,
                samples: stats.map_or(0, |stats| stats.samples),
                within_sla: average_hours.map(|hours| hours <= sla_hours as f64),
            }
        })
        .collect();

        let urgency = [UrgencyTier::Green, UrgencyTier::Amber, UrgencyTier::Red]
            .into_iter()
            .map(|tier| UrgencyCountEntry {
                tier,
                tier_label: tier.label(),
                count: self.urgency_counts.get(&tier).copied().unwrap_or(0),
            })
            .collect();

        let alerts = self
            .alerts
            .iter()
            .map(|alert| SlaAlertView {
                episode_id: alert.episode.id.clone(),
                code: alert.episode.code.clone(),
                state: alert.episode.state,
                state_label: alert.episode.state.label(),
                urgency: alert.urgency,
                urgency_label: alert.urgency.label(),
                hours_in_state: alert.hours_in_state,
            })
            .collect();

        DashboardView {
            total: self.total,
            open: self.open(),
            closed: self.closed(),
            states,
            turnaround,
            bypass_rate_pct: self.bypass_rate_pct(),
            proposals_accepted_pct: self.proposals_accepted_pct(),
            urgency,
            alerts,
        }
    }
}
