//! Operational dashboard computed from episode milestones.

pub mod views;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::workflows::episodes::{
    urgency_for, Episode, EpisodeState, SlaStage, SlaTable, TherapyProposal, UrgencyTier,
};
pub use views::{
    DashboardView, SlaAlertView, StateCountEntry, TurnaroundEntry, UrgencyCountEntry,
};

/// Milestone pairs whose elapsed time is tracked against an SLA.
const TURNAROUND_PAIRS: [(SlaStage, EpisodeState, EpisodeState); 3] = [
    (
        SlaStage::PhysicianConsult,
        EpisodeState::PsychEvalInProgress,
        EpisodeState::ReferredToPhysician,
    ),
    (
        SlaStage::Extraction,
        EpisodeState::LabOrderIssued,
        EpisodeState::SamplesInTransit,
    ),
    (
        SlaStage::Laboratory,
        EpisodeState::SamplesInTransit,
        EpisodeState::LabResultsAvailable,
    ),
];

#[derive(Debug, Default, Clone)]
pub struct Turnaround {
    pub total_hours: f64,
    pub samples: usize,
}

impl Turnaround {
    pub fn average_hours(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.total_hours / self.samples as f64)
    }
}

#[derive(Debug, Clone)]
pub struct SlaAlert {
    pub episode: Episode,
    pub urgency: UrgencyTier,
    pub hours_in_state: i64,
}

#[derive(Debug, Default)]
pub struct DashboardSummary {
    pub total: usize,
    pub state_counts: HashMap<EpisodeState, usize>,
    pub turnaround: HashMap<SlaStage, Turnaround>,
    pub urgency_counts: HashMap<UrgencyTier, usize>,
    pub psych_decisions: usize,
    pub bypassed: usize,
    pub proposals: usize,
    pub accepted_proposals: usize,
    pub alerts: Vec<SlaAlert>,
}

impl DashboardSummary {
    pub fn compute(episodes: &[Episode], sla: &SlaTable, now: DateTime<Utc>) -> Self {
        let mut summary = Self {
            total: episodes.len(),
            ..Self::default()
        };

        for episode in episodes {
            *summary.state_counts.entry(episode.state).or_default() += 1;

            let entered_at = episode.entered_current_state_at();
            let urgency = urgency_for(episode.state, entered_at, now, sla);
            *summary.urgency_counts.entry(urgency).or_default() += 1;
            if urgency != UrgencyTier::Green {
                summary.alerts.push(SlaAlert {
                    episode: episode.clone(),
                    urgency,
                    hours_in_state: (now - entered_at).num_hours(),
                });
            }

            let milestones = episode.milestone_map();
            for (stage, from, to) in TURNAROUND_PAIRS {
                if let (Some(start), Some(end)) = (milestones.get(&from), milestones.get(&to)) {
                    if end >= start {
                        let entry = summary.turnaround.entry(stage).or_default();
                        entry.total_hours += (*end - *start).num_minutes() as f64 / 60.0;
                        entry.samples += 1;
                    }
                }
            }

            let bypassed = milestones.contains_key(&EpisodeState::PsychOkNoReferral);
            if bypassed || milestones.contains_key(&EpisodeState::ReferredToPhysician) {
                summary.psych_decisions += 1;
            }
            if bypassed {
                summary.bypassed += 1;
            }
        }

        summary.alerts.sort_by(|a, b| {
            b.urgency
                .eq(&UrgencyTier::Red)
                .cmp(&a.urgency.eq(&UrgencyTier::Red))
                .then(b.hours_in_state.cmp(&a.hours_in_state))
        });
        summary
    }

    /// Folds in the therapy proposals issued for the summarised episodes.
    pub fn with_proposals<'a>(
        mut self,
        proposals: impl IntoIterator<Item = &'a TherapyProposal>,
    ) -> Self {
        for proposal in proposals {
            self.proposals += 1;
            if proposal.accepted {
                self.accepted_proposals += 1;
            }
        }
        self
    }

    pub fn open(&self) -> usize {
        self.total - self.closed()
    }

    pub fn closed(&self) -> usize {
        self.state_counts
            .get(&EpisodeState::Closed)
            .copied()
            .unwrap_or(0)
    }

    /// Share of psychological decisions that skipped the physician, in percent.
    pub fn bypass_rate_pct(&self) -> Option<f64> {
        (self.psych_decisions > 0)
            .then(|| self.bypassed as f64 * 100.0 / self.psych_decisions as f64)
    }

    pub fn proposals_accepted_pct(&self) -> Option<f64> {
        (self.proposals > 0)
            .then(|| self.accepted_proposals as f64 * 100.0 / self.proposals as f64)
    }
}
