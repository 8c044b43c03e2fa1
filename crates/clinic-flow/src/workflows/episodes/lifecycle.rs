use chrono::{DateTime, Utc};

use super::domain::{Episode, EpisodeState, Milestone};

use EpisodeState::*;

/// State-changing commands the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    SubmitTestResult,
    DeriveToPhysician,
    ClosePsychNoReferral,
    IssueMedicalOrder,
    ScheduleExtraction,
    MarkSamplesInTransit,
    MarkReceivedAtLab,
    RegisterLabResult,
    CreateIntegratedReport,
    CreateProposal,
    SendProposal,
    RegisterSurvey,
    Reopen,
}

impl Transition {
    pub const fn name(self) -> &'static str {
        match self {
            Self::SubmitTestResult => "submit_test_result",
            Self::DeriveToPhysician => "derive_to_physician",
            Self::ClosePsychNoReferral => "close_psych_no_referral",
            Self::IssueMedicalOrder => "issue_medical_order",
            Self::ScheduleExtraction => "schedule_extraction",
            Self::MarkSamplesInTransit => "mark_samples_in_transit",
            Self::MarkReceivedAtLab => "mark_received_at_lab",
            Self::RegisterLabResult => "register_lab_result",
            Self::CreateIntegratedReport => "create_integrated_report",
            Self::CreateProposal => "create_proposal",
            Self::SendProposal => "send_proposal",
            Self::RegisterSurvey => "register_survey",
            Self::Reopen => "reopen",
        }
    }

    /// States the command may run from; `None` means any state.
    pub const fn legal_from(self) -> Option<&'static [EpisodeState]> {
        match self {
            Self::DeriveToPhysician | Self::ClosePsychNoReferral => {
                Some(&[PsychEvalInProgress, Created])
            }
            Self::IssueMedicalOrder => Some(&[ReferredToPhysician]),
            Self::ScheduleExtraction => Some(&[LabOrderIssued]),
            Self::RegisterLabResult => Some(&[SamplesInTransit, LabAnalysisInProgress]),
            Self::CreateIntegratedReport => Some(&[LabResultsAvailable, PsychOkNoReferral]),
            Self::CreateProposal => Some(&[IntegratedReportReady]),
            Self::Reopen => Some(&[Closed]),
            Self::SubmitTestResult
            | Self::MarkSamplesInTransit
            | Self::MarkReceivedAtLab
            | Self::SendProposal
            | Self::RegisterSurvey => None,
        }
    }

    pub const fn target(self) -> EpisodeState {
        match self {
            Self::SubmitTestResult => PsychEvalInProgress,
            Self::DeriveToPhysician => ReferredToPhysician,
            Self::ClosePsychNoReferral => PsychOkNoReferral,
            Self::IssueMedicalOrder => LabOrderIssued,
            Self::ScheduleExtraction => ExtractionScheduled,
            Self::MarkSamplesInTransit => SamplesInTransit,
            Self::MarkReceivedAtLab => LabAnalysisInProgress,
            Self::RegisterLabResult => LabResultsAvailable,
            Self::CreateIntegratedReport => IntegratedReportReady,
            Self::CreateProposal => ProposalIssued,
            Self::SendProposal => FollowUp,
            Self::RegisterSurvey => Closed,
            Self::Reopen => Created,
        }
    }

    pub fn permits(self, state: EpisodeState) -> bool {
        match self.legal_from() {
            Some(states) => states.contains(&state),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot {} while episode is {state}", .transition.name())]
    InvalidState {
        transition: Transition,
        state: EpisodeState,
    },
}

impl Episode {
    /// Validates and applies a transition. On error the episode is untouched.
    pub fn apply(&mut self, transition: Transition, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        if !transition.permits(self.state) {
            return Err(LifecycleError::InvalidState {
                transition,
                state: self.state,
            });
        }

        let target = transition.target();
        if self.state != target {
            self.state = target;
            self.milestones.push(Milestone {
                state: target,
                reached_at: at,
            });
        }

        match target {
            Closed => self.closed_at = Some(at),
            _ if transition == Transition::Reopen => self.closed_at = None,
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::episodes::domain::{
        Actor, EpisodeDraft, EpisodeId, InstitutionId, PatientId,
    };
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 12, 8, 30, 0).unwrap()
    }

    fn episode() -> Episode {
        Episode::open(
            EpisodeId("epi-test".to_string()),
            "EPI-INST-20250512083000-0001".to_string(),
            EpisodeDraft {
                patient_id: PatientId("pat-1".to_string()),
                institution_id: InstitutionId("inst-1".to_string()),
                responsible_professional: None,
                title: "Annual screening".to_string(),
                notes: None,
            },
            Actor::system(),
            start(),
        )
    }

    #[test]
    fn happy_path_records_each_milestone_in_order() {
        let mut episode = episode();
        let path = [
            Transition::SubmitTestResult,
            Transition::DeriveToPhysician,
            Transition::IssueMedicalOrder,
            Transition::ScheduleExtraction,
            Transition::MarkSamplesInTransit,
            Transition::RegisterLabResult,
            Transition::CreateIntegratedReport,
            Transition::CreateProposal,
            Transition::SendProposal,
            Transition::RegisterSurvey,
        ];

        for (step, transition) in path.iter().enumerate() {
            let at = start() + Duration::hours(step as i64 + 1);
            episode.apply(*transition, at).expect("legal transition");
        }

        let visited: Vec<EpisodeState> = episode.milestones.iter().map(|m| m.state).collect();
        assert_eq!(
            visited,
            vec![
                Created,
                PsychEvalInProgress,
                ReferredToPhysician,
                LabOrderIssued,
                ExtractionScheduled,
                SamplesInTransit,
                LabResultsAvailable,
                IntegratedReportReady,
                ProposalIssued,
                FollowUp,
                Closed,
            ]
        );
        assert!(episode
            .milestones
            .windows(2)
            .all(|pair| pair[0].reached_at <= pair[1].reached_at));
        assert_eq!(episode.closed_at, Some(start() + Duration::hours(10)));
    }

    #[test]
    fn illegal_transition_leaves_episode_untouched() {
        let mut episode = episode();
        episode.state = LabOrderIssued;
        let before = episode.clone();

        let error = episode
            .apply(Transition::CreateIntegratedReport, start())
            .expect_err("report requires lab results");

        assert_eq!(
            error,
            LifecycleError::InvalidState {
                transition: Transition::CreateIntegratedReport,
                state: LabOrderIssued,
            }
        );
        assert_eq!(episode, before);
        assert_eq!(
            error.to_string(),
            "cannot create_integrated_report while episode is LAB_ORDER_ISSUED"
        );
    }

    #[test]
    fn derive_is_legal_straight_from_created() {
        let mut episode = episode();
        episode
            .apply(Transition::DeriveToPhysician, start() + Duration::minutes(5))
            .expect("created episodes can be referred");
        assert_eq!(episode.state, ReferredToPhysician);
        assert_eq!(episode.milestones.len(), 2);
    }

    #[test]
    fn staying_in_a_state_appends_no_milestone() {
        let mut episode = episode();
        episode
            .apply(Transition::SubmitTestResult, start() + Duration::hours(1))
            .expect("first test");
        episode
            .apply(Transition::SubmitTestResult, start() + Duration::hours(2))
            .expect("second test");

        assert_eq!(episode.milestones.len(), 2);
        assert_eq!(
            episode.first_reached(PsychEvalInProgress),
            Some(start() + Duration::hours(1))
        );
    }

    #[test]
    fn psych_branch_reaches_report_without_lab_work() {
        let mut episode = episode();
        episode
            .apply(Transition::ClosePsychNoReferral, start() + Duration::hours(1))
            .expect("clearance");
        episode
            .apply(Transition::CreateIntegratedReport, start() + Duration::hours(2))
            .expect("report from clearance");
        assert_eq!(episode.state, IntegratedReportReady);
        assert!(!episode.has_reached(LabResultsAvailable));
    }

    #[test]
    fn lab_results_accepted_from_analysis_state() {
        let mut episode = episode();
        episode.state = ExtractionScheduled;
        assert!(episode
            .apply(Transition::RegisterLabResult, start())
            .is_err());
        episode
            .apply(Transition::MarkReceivedAtLab, start() + Duration::hours(1))
            .expect("received at lab");
        episode
            .apply(Transition::RegisterLabResult, start() + Duration::hours(2))
            .expect("results from analysis");
        assert_eq!(episode.state, LabResultsAvailable);
    }

    #[test]
    fn reopen_clears_closure_and_keeps_history() {
        let mut episode = episode();
        episode
            .apply(Transition::RegisterSurvey, start() + Duration::hours(1))
            .expect("survey closes from any state");
        assert!(episode.closed_at.is_some());

        assert!(episode.apply(Transition::Reopen, start()).is_ok());
        assert_eq!(episode.state, Created);
        assert!(episode.closed_at.is_none());

        let created_entries = episode
            .milestones
            .iter()
            .filter(|milestone| milestone.state == Created)
            .count();
        assert_eq!(created_entries, 2);
        assert_eq!(episode.milestone_map()[&Created], start());
        assert_eq!(episode.entered_current_state_at(), start());

        assert!(episode.apply(Transition::Reopen, start()).is_err());
    }

    #[test]
    fn open_ended_commands_accept_every_state() {
        for state in EpisodeState::ordered() {
            assert!(Transition::SendProposal.permits(state));
            assert!(Transition::RegisterSurvey.permits(state));
            assert!(Transition::SubmitTestResult.permits(state));
        }
        assert!(!Transition::CreateProposal.permits(LabResultsAvailable));
    }
}
