use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::commands::{
    ExtractionRequest, ExtractionStatusUpdate, IntegratedReportRequest, LabResultSubmission,
    MedicalOrderRequest, ProposalRequest, PsychClearance, ReferralNote, SendProposalRequest,
    SurveySubmission, TestSubmission,
};
use super::domain::{
    Actor, DeliveryLog, DeliveryStatus, Episode, EpisodeAssignment, EpisodeDraft, EpisodeId,
    EpisodeState, Extraction, ExtractionId, ExtractionStatus, InstitutionId, IntegratedReport,
    LabResult, MedicalOrder, NotificationChannel, PatientContact, RecordId, SideRecord, Survey,
    TestResult, TherapyProposal,
};
use super::lifecycle::{LifecycleError, Transition};
use super::repository::{
    AuditEntry, AuditSink, ClinicDirectory, DocumentKind, DocumentRenderer, DocumentRequest,
    EpisodeFilter, EpisodeRepository, Notification, NotificationDispatcher, RenderError,
    RepositoryError,
};
use super::urgency::SlaTable;
use super::views::{
    EpisodeDetailView, EpisodeView, LabResultOutcome, RecordOutcome, TestResultOutcome,
};
use crate::workflows::dashboard::{DashboardSummary, DashboardView};
use crate::workflows::eligibility::{BypassAssessment, BypassEvaluator, EvaluationInput};

const AUDIT_ENTITY: &str = "episode";

static EPISODE_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static RECORD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_episode_id() -> EpisodeId {
    let id = EPISODE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    EpisodeId(format!("epi-{id:06}"))
}

fn next_record_id(prefix: &str) -> String {
    let id = RECORD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{id:06}")
}

/// `EPI-<INST>-<yyyymmddHHMMSS>-<seq>`; the sequence keeps same-second codes unique.
fn episode_code(institution: &InstitutionId, id: &EpisodeId, at: DateTime<Utc>) -> String {
    let prefix: String = institution
        .0
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(4)
        .collect::<String>()
        .to_ascii_uppercase();
    let sequence = id.0.rsplit('-').next().unwrap_or_default();
    format!("EPI-{prefix}-{}-{sequence}", at.format("%Y%m%d%H%M%S"))
}

/// Outbound collaborators shared by every episode command.
#[derive(Clone)]
pub struct EpisodeCollaborators {
    pub documents: Arc<dyn DocumentRenderer>,
    pub notifications: Arc<dyn NotificationDispatcher>,
    pub audit: Arc<dyn AuditSink>,
}

/// Lifecycle engine: validates commands, applies transitions and persists
/// each transition with its side records in one write.
pub struct EpisodeService<R, D> {
    repository: Arc<R>,
    directory: Arc<D>,
    documents: Arc<dyn DocumentRenderer>,
    notifications: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    evaluator: BypassEvaluator,
}

impl<R, D> EpisodeService<R, D>
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    pub fn new(repository: Arc<R>, directory: Arc<D>, collaborators: EpisodeCollaborators) -> Self {
        Self {
            repository,
            directory,
            documents: collaborators.documents,
            notifications: collaborators.notifications,
            audit: collaborators.audit,
            evaluator: BypassEvaluator::new(),
        }
    }

    /// Opens a new episode in `CREATED` after checking the directory.
    pub fn create(
        &self,
        draft: EpisodeDraft,
        actor: &Actor,
    ) -> Result<EpisodeView, EpisodeServiceError> {
        if self.directory.patient(&draft.patient_id)?.is_none() {
            return Err(EpisodeServiceError::Validation(format!(
                "unknown patient {}",
                draft.patient_id.0
            )));
        }
        if self.directory.institution(&draft.institution_id)?.is_none() {
            return Err(EpisodeServiceError::Validation(format!(
                "unknown institution {}",
                draft.institution_id.0
            )));
        }
        let professional = match &draft.responsible_professional {
            Some(professional_id) => {
                let professional =
                    self.directory.professional(professional_id)?.ok_or_else(|| {
                        EpisodeServiceError::Validation(format!(
                            "unknown professional {}",
                            professional_id.0
                        ))
                    })?;
                if !professional.actively_affiliated_with(&draft.institution_id) {
                    return Err(EpisodeServiceError::Validation(format!(
                        "professional {} has no active affiliation with institution {}",
                        professional_id.0, draft.institution_id.0
                    )));
                }
                Some(professional)
            }
            None => None,
        };

        let now = Utc::now();
        let id = next_episode_id();
        let code = episode_code(&draft.institution_id, &id, now);
        let assignment = professional.map(|professional| EpisodeAssignment {
            id: RecordId(next_record_id("asg")),
            episode_id: id.clone(),
            professional_id: professional.id,
            professional_name: professional.full_name,
            role: professional.specialty,
            assigned_by: actor.clone(),
            assigned_at: now,
            ended_at: None,
            notes: None,
        });
        let episode = Episode::open(id, code, draft, actor.clone(), now);
        let records = assignment
            .iter()
            .cloned()
            .map(SideRecord::Assignment)
            .collect();
        let stored = self.repository.insert(episode, records)?;

        info!(episode = %stored.code, institution = %stored.institution_id.0, "episode created");
        self.record_audit(
            &stored,
            "CREATE",
            actor,
            Some(json!({
                "code": stored.code,
                "patient_id": stored.patient_id,
                "institution_id": stored.institution_id,
                "assignment": assignment.as_ref().map(|assignment| json!({
                    "professional_id": assignment.professional_id,
                    "role": assignment.role,
                })),
            })),
        );

        Ok(self.view(&stored))
    }

    pub fn get(&self, id: &EpisodeId) -> Result<EpisodeDetailView, EpisodeServiceError> {
        let episode = self.load(id)?;
        let records = self.repository.records(id)?;
        Ok(EpisodeDetailView {
            episode: self.view(&episode),
            records,
        })
    }

    pub fn list(&self, filter: &EpisodeFilter) -> Result<Vec<EpisodeView>, EpisodeServiceError> {
        let episodes = self.repository.list(filter)?;
        Ok(episodes.iter().map(|episode| self.view(episode)).collect())
    }

    /// Professionals assigned to the episode, oldest first.
    pub fn assignments(
        &self,
        id: &EpisodeId,
    ) -> Result<Vec<EpisodeAssignment>, EpisodeServiceError> {
        self.load(id)?;
        let mut assignments = self.repository.records(id)?.assignments;
        assignments.sort_by_key(|assignment| assignment.assigned_at);
        Ok(assignments)
    }

    pub fn timeline(&self, id: &EpisodeId) -> Result<Vec<AuditEntry>, EpisodeServiceError> {
        self.load(id)?;
        let mut entries = self
            .audit
            .history(AUDIT_ENTITY, &id.0)
            .map_err(|error| EpisodeServiceError::Unavailable(error.to_string()))?;
        entries.sort_by_key(|entry| entry.timestamp);
        Ok(entries)
    }

    /// Stores a psychometric result and returns the advisory bypass signal.
    pub fn submit_test_result(
        &self,
        id: &EpisodeId,
        submission: TestSubmission,
        actor: &Actor,
    ) -> Result<TestResultOutcome, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        if self.directory.test(&submission.test_code)?.is_none() {
            return Err(EpisodeServiceError::Validation(format!(
                "unknown test {}",
                submission.test_code
            )));
        }

        let prior = episode.state;
        let now = Utc::now();
        episode.apply(Transition::SubmitTestResult, now)?;

        let test_result = TestResult {
            id: RecordId(next_record_id("tst")),
            episode_id: episode.id.clone(),
            test_code: submission.test_code.clone(),
            scores: submission.scores.clone(),
            interpretation: submission.interpretation.clone(),
            recorded_by: actor.clone(),
            created_at: now,
        };

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::TestResult(test_result.clone())])?;
        self.log_transition(&stored, prior, Transition::SubmitTestResult);

        let assessment = self.assess_for(&stored.institution_id, &submission.scores, &submission.flags);
        self.record_audit(
            &stored,
            "ADD_TEST_RESULT",
            actor,
            Some(json!({
                "test_code": test_result.test_code,
                "scores": test_result.scores,
                "bypass_suggested": assessment.eligible,
            })),
        );

        Ok(TestResultOutcome {
            episode: self.view(&stored),
            test_result,
            bypass_suggested: assessment.eligible,
            assessment,
        })
    }

    pub fn derive_to_physician(
        &self,
        id: &EpisodeId,
        referral: ReferralNote,
        actor: &Actor,
    ) -> Result<EpisodeView, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        let prior = episode.state;
        episode.apply(Transition::DeriveToPhysician, Utc::now())?;
        if let Some(note) = &referral.note {
            episode.notes = Some(note.clone());
        }

        let stored = self.repository.save_all(&episode, Vec::new())?;
        self.log_transition(&stored, prior, Transition::DeriveToPhysician);
        self.record_audit(
            &stored,
            "DERIVE_TO_PHYSICIAN",
            actor,
            Some(json!({ "note": referral.note })),
        );
        Ok(self.view(&stored))
    }

    pub fn close_psych_no_referral(
        &self,
        id: &EpisodeId,
        clearance: PsychClearance,
        actor: &Actor,
    ) -> Result<EpisodeView, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        let prior = episode.state;
        episode.apply(Transition::ClosePsychNoReferral, Utc::now())?;
        if let Some(note) = &clearance.note {
            episode.notes = Some(note.clone());
        }

        let stored = self.repository.save_all(&episode, Vec::new())?;
        self.log_transition(&stored, prior, Transition::ClosePsychNoReferral);
        self.record_audit(
            &stored,
            "PSYCH_OK_NO_REFERRAL",
            actor,
            Some(json!({ "clinical_flags": clearance.flags })),
        );
        Ok(self.view(&stored))
    }

    /// Renders the order document first; a render failure persists nothing.
    pub fn issue_medical_order(
        &self,
        id: &EpisodeId,
        request: MedicalOrderRequest,
        actor: &Actor,
    ) -> Result<RecordOutcome<MedicalOrder>, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        if request.items.is_empty() {
            return Err(EpisodeServiceError::Validation(
                "a medical order needs at least one item".to_string(),
            ));
        }

        let prior = episode.state;
        let now = Utc::now();
        episode.apply(Transition::IssueMedicalOrder, now)?;

        let mut lines: Vec<String> = request
            .items
            .iter()
            .map(|item| {
                let authorization = if item.requires_authorization {
                    " [authorization required]"
                } else {
                    ""
                };
                format!("{} {} ({:?}){authorization}", item.code, item.name, item.complexity)
            })
            .collect();
        lines.push(format!("Destination: {}", request.destination));
        lines.push(format!("Signed by: {}", request.signed_by));

        let document = self.documents.render(&DocumentRequest {
            kind: DocumentKind::MedicalOrder,
            episode_code: episode.code.clone(),
            title: "Medical order".to_string(),
            lines,
        })?;

        let order = MedicalOrder {
            id: RecordId(next_record_id("ord")),
            episode_id: episode.id.clone(),
            items: request.items,
            destination: request.destination,
            signed_by: request.signed_by,
            document,
            created_at: now,
        };

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::MedicalOrder(order.clone())])?;
        self.log_transition(&stored, prior, Transition::IssueMedicalOrder);
        self.record_audit(
            &stored,
            "CREATE_MEDICAL_ORDER",
            actor,
            Some(json!({
                "order_id": order.id,
                "items": order.items.len(),
                "total_price": order.total_price(),
            })),
        );

        Ok(RecordOutcome {
            episode: self.view(&stored),
            record: order,
        })
    }

    pub fn schedule_extraction(
        &self,
        id: &EpisodeId,
        request: ExtractionRequest,
        actor: &Actor,
    ) -> Result<RecordOutcome<Extraction>, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        if request.time_slot.trim().is_empty() {
            return Err(EpisodeServiceError::Validation(
                "extraction time slot is required".to_string(),
            ));
        }

        let prior = episode.state;
        let now = Utc::now();
        episode.apply(Transition::ScheduleExtraction, now)?;

        let extraction = Extraction {
            id: ExtractionId(next_record_id("ext")),
            episode_id: episode.id.clone(),
            scheduled_for: request.scheduled_for,
            time_slot: request.time_slot,
            phlebotomist: request.phlebotomist,
            status: ExtractionStatus::Scheduled,
            evidence: BTreeMap::new(),
            updated_at: now,
        };

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::Extraction(extraction.clone())])?;
        self.log_transition(&stored, prior, Transition::ScheduleExtraction);
        self.record_audit(
            &stored,
            "CREATE_EXTRACTION",
            actor,
            Some(json!({
                "extraction_id": extraction.id,
                "scheduled_for": extraction.scheduled_for,
                "time_slot": extraction.time_slot,
            })),
        );

        Ok(RecordOutcome {
            episode: self.view(&stored),
            record: extraction,
        })
    }

    /// Updates an extraction. Transit and lab reception move the episode;
    /// other statuses only touch the extraction record.
    pub fn update_extraction_status(
        &self,
        extraction_id: &ExtractionId,
        update: ExtractionStatusUpdate,
        actor: &Actor,
    ) -> Result<RecordOutcome<Extraction>, EpisodeServiceError> {
        let mut extraction = self
            .repository
            .fetch_extraction(extraction_id)?
            .ok_or_else(|| {
                EpisodeServiceError::NotFound(format!("extraction {}", extraction_id.0))
            })?;
        let mut episode = self.load(&extraction.episode_id)?;
        let prior = episode.state;
        let now = Utc::now();

        let transition = match update.status {
            ExtractionStatus::SamplesInTransit => Some(Transition::MarkSamplesInTransit),
            ExtractionStatus::ReceivedAtLab => Some(Transition::MarkReceivedAtLab),
            _ => None,
        };
        if let Some(transition) = transition {
            episode.apply(transition, now)?;
        }

        let previous_status = extraction.status;
        extraction.status = update.status;
        extraction.evidence.extend(update.evidence);
        extraction.updated_at = now;

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::Extraction(extraction.clone())])?;
        if let Some(transition) = transition {
            self.log_transition(&stored, prior, transition);
        }
        self.record_audit(
            &stored,
            "UPDATE_EXTRACTION_STATUS",
            actor,
            Some(json!({
                "extraction_id": extraction.id,
                "from": previous_status,
                "to": extraction.status,
            })),
        );

        Ok(RecordOutcome {
            episode: self.view(&stored),
            record: extraction,
        })
    }

    /// Persists the result, then notifies the patient. Notification failures
    /// are reported through `patient_notified` and never undo the commit.
    pub fn register_lab_result(
        &self,
        id: &EpisodeId,
        submission: LabResultSubmission,
        actor: &Actor,
    ) -> Result<LabResultOutcome, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        if submission.document_path.trim().is_empty() {
            return Err(EpisodeServiceError::Validation(
                "lab result document path is required".to_string(),
            ));
        }

        let prior = episode.state;
        let now = Utc::now();
        episode.apply(Transition::RegisterLabResult, now)?;

        let lab_result = LabResult {
            id: RecordId(next_record_id("lab")),
            episode_id: episode.id.clone(),
            document_path: submission.document_path,
            values: submission.values,
            provider: submission.provider,
            signed: submission.signed,
            sent_to_patient: submission.send_to_patient,
            billed_to_insurer: submission.billed_to_insurer,
            created_at: now,
        };

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::LabResult(lab_result.clone())])?;
        self.log_transition(&stored, prior, Transition::RegisterLabResult);

        let patient_notified = lab_result.sent_to_patient && self.notify_lab_result(&stored, &lab_result);
        self.record_audit(
            &stored,
            "LAB_RESULTS_UPLOADED",
            actor,
            Some(json!({
                "lab_result_id": lab_result.id,
                "provider": lab_result.provider,
                "patient_notified": patient_notified,
            })),
        );

        Ok(LabResultOutcome {
            episode: self.view(&stored),
            lab_result,
            patient_notified,
        })
    }

    pub fn create_integrated_report(
        &self,
        id: &EpisodeId,
        request: IntegratedReportRequest,
        actor: &Actor,
    ) -> Result<RecordOutcome<IntegratedReport>, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        let prior = episode.state;
        let now = Utc::now();
        episode.apply(Transition::CreateIntegratedReport, now)?;

        let records = self.repository.records(id)?;
        let version = format!("v{}", records.integrated_reports.len() + 1);

        let mut lines = vec![
            format!("Report type: {}", request.kind),
            format!("Version: {version}"),
            format!("Psychometric results: {}", records.test_results.len()),
            format!("Laboratory results: {}", records.lab_results.len()),
        ];
        if let Some(summary) = &request.summary {
            lines.push(summary.clone());
        }
        lines.push(format!("Signed by: {}", request.signed_by));

        let document = self.documents.render(&DocumentRequest {
            kind: DocumentKind::IntegratedReport,
            episode_code: episode.code.clone(),
            title: "Integrated report".to_string(),
            lines,
        })?;

        let report = IntegratedReport {
            id: RecordId(next_record_id("rep")),
            episode_id: episode.id.clone(),
            kind: request.kind,
            version,
            signed_by: request.signed_by,
            document,
            created_at: now,
        };

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::IntegratedReport(report.clone())])?;
        self.log_transition(&stored, prior, Transition::CreateIntegratedReport);
        self.record_audit(
            &stored,
            "INTEGRATED_REPORT_CREATED",
            actor,
            Some(json!({ "report_id": report.id, "version": report.version })),
        );

        Ok(RecordOutcome {
            episode: self.view(&stored),
            record: report,
        })
    }

    pub fn create_proposal(
        &self,
        id: &EpisodeId,
        request: ProposalRequest,
        actor: &Actor,
    ) -> Result<RecordOutcome<TherapyProposal>, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        if request.kind.trim().is_empty() {
            return Err(EpisodeServiceError::Validation(
                "proposal type is required".to_string(),
            ));
        }

        let prior = episode.state;
        let now = Utc::now();
        episode.apply(Transition::CreateProposal, now)?;

        let proposal = TherapyProposal {
            id: RecordId(next_record_id("prp")),
            episode_id: episode.id.clone(),
            kind: request.kind,
            details: request.details,
            configured_value: request.configured_value,
            accepted: request.accepted,
            proposed_for: request.proposed_for,
            deliveries: Vec::new(),
            created_at: now,
        };

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::TherapyProposal(proposal.clone())])?;
        self.log_transition(&stored, prior, Transition::CreateProposal);
        self.record_audit(
            &stored,
            "THERAPY_PROPOSAL_CREATED",
            actor,
            Some(json!({ "proposal_id": proposal.id, "type": proposal.kind })),
        );

        Ok(RecordOutcome {
            episode: self.view(&stored),
            record: proposal,
        })
    }

    /// Dispatches the latest proposal on each channel. Every attempt is logged
    /// on the proposal; failed deliveries do not block the transition.
    pub fn send_proposal(
        &self,
        id: &EpisodeId,
        request: SendProposalRequest,
        actor: &Actor,
    ) -> Result<RecordOutcome<TherapyProposal>, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        let records = self.repository.records(id)?;
        let mut proposal = records.proposals.last().cloned().ok_or_else(|| {
            EpisodeServiceError::NotFound(format!("therapy proposal for episode {}", id.0))
        })?;

        let prior = episode.state;
        let now = Utc::now();
        episode.apply(Transition::SendProposal, now)?;

        let patient = self.directory.patient(&episode.patient_id)?;
        let institution_name = self
            .directory
            .institution(&episode.institution_id)?
            .map(|institution| institution.name)
            .unwrap_or_default();

        let mut payload = BTreeMap::new();
        payload.insert(
            "patient_first_name".to_string(),
            patient
                .as_ref()
                .map(|contact| contact.first_name().to_string())
                .unwrap_or_default(),
        );
        payload.insert("institution_name".to_string(), institution_name);
        payload.insert("proposal_type".to_string(), proposal.kind.clone());
        payload.insert(
            "proposal_link".to_string(),
            request.proposal_link.clone().unwrap_or_default(),
        );

        let channels = if request.channels.is_empty() {
            vec![NotificationChannel::Email]
        } else {
            request.channels.clone()
        };
        for channel in &channels {
            let log = self.deliver(*channel, patient.as_ref(), "therapy_proposal", &payload, now);
            proposal.deliveries.push(log);
        }

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::TherapyProposal(proposal.clone())])?;
        self.log_transition(&stored, prior, Transition::SendProposal);

        let attempts: Vec<Value> = proposal
            .deliveries
            .iter()
            .rev()
            .take(channels.len())
            .map(|log| json!({ "channel": log.channel, "status": log.status }))
            .collect();
        self.record_audit(
            &stored,
            "THERAPY_PROPOSAL_SENT",
            actor,
            Some(json!({ "proposal_id": proposal.id, "deliveries": attempts })),
        );

        Ok(RecordOutcome {
            episode: self.view(&stored),
            record: proposal,
        })
    }

    pub fn register_survey(
        &self,
        id: &EpisodeId,
        submission: SurveySubmission,
        actor: &Actor,
    ) -> Result<RecordOutcome<Survey>, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        let nps = u8::try_from(submission.nps)
            .ok()
            .filter(|score| *score <= 10)
            .ok_or_else(|| {
                EpisodeServiceError::Validation(format!(
                    "nps must be between 0 and 10, got {}",
                    submission.nps
                ))
            })?;

        let prior = episode.state;
        let now = Utc::now();
        episode.apply(Transition::RegisterSurvey, now)?;

        let survey = Survey {
            id: RecordId(next_record_id("srv")),
            episode_id: episode.id.clone(),
            nps,
            items: submission.items,
            comment: submission.comment,
            submitted_at: now,
        };

        let stored = self
            .repository
            .save_all(&episode, vec![SideRecord::Survey(survey.clone())])?;
        self.log_transition(&stored, prior, Transition::RegisterSurvey);
        self.record_audit(
            &stored,
            "SURVEY_COMPLETED",
            actor,
            Some(json!({ "survey_id": survey.id, "nps": survey.nps })),
        );

        Ok(RecordOutcome {
            episode: self.view(&stored),
            record: survey,
        })
    }

    /// Returns a closed episode to `CREATED`; history is kept.
    pub fn reopen(&self, id: &EpisodeId, actor: &Actor) -> Result<EpisodeView, EpisodeServiceError> {
        let mut episode = self.load(id)?;
        let prior = episode.state;
        episode.apply(Transition::Reopen, Utc::now())?;

        let stored = self.repository.save_all(&episode, Vec::new())?;
        self.log_transition(&stored, prior, Transition::Reopen);
        self.record_audit(&stored, "REOPEN", actor, None);
        Ok(self.view(&stored))
    }

    /// Evaluates bypass eligibility against an institution's rule set.
    pub fn evaluate_bypass(
        &self,
        institution_id: &InstitutionId,
        input: &EvaluationInput,
    ) -> Result<BypassAssessment, EpisodeServiceError> {
        let institution = self.directory.institution(institution_id)?.ok_or_else(|| {
            EpisodeServiceError::NotFound(format!("institution {}", institution_id.0))
        })?;
        Ok(self.evaluator.assess(
            &input.scores,
            &input.flags,
            institution.parameters.eligibility.as_ref(),
        ))
    }

    pub fn dashboard(
        &self,
        filter: &EpisodeFilter,
        now: DateTime<Utc>,
    ) -> Result<DashboardView, EpisodeServiceError> {
        let episodes = self.repository.list(filter)?;
        let sla = match &filter.institution_id {
            Some(institution_id) => self.sla_for(institution_id),
            None => SlaTable::default(),
        };
        let mut proposals = Vec::new();
        for episode in &episodes {
            proposals.extend(self.repository.records(&episode.id)?.proposals);
        }
        Ok(DashboardSummary::compute(&episodes, &sla, now)
            .with_proposals(&proposals)
            .view(&sla))
    }

    fn load(&self, id: &EpisodeId) -> Result<Episode, EpisodeServiceError> {
        self.repository
            .fetch(id)?
            .ok_or_else(|| EpisodeServiceError::NotFound(format!("episode {}", id.0)))
    }

    fn sla_for(&self, institution_id: &InstitutionId) -> SlaTable {
        match self.directory.institution(institution_id) {
            Ok(Some(institution)) => institution.parameters.slas,
            Ok(None) => SlaTable::default(),
            Err(error) => {
                warn!(%error, institution = %institution_id.0, "falling back to default SLAs");
                SlaTable::default()
            }
        }
    }

    fn view(&self, episode: &Episode) -> EpisodeView {
        EpisodeView::build(episode, &self.sla_for(&episode.institution_id), Utc::now())
    }

    fn assess_for(
        &self,
        institution_id: &InstitutionId,
        scores: &BTreeMap<String, f64>,
        flags: &BTreeMap<String, bool>,
    ) -> BypassAssessment {
        let config = match self.directory.institution(institution_id) {
            Ok(institution) => institution.and_then(|profile| profile.parameters.eligibility),
            Err(error) => {
                warn!(%error, institution = %institution_id.0, "bypass rules unavailable");
                None
            }
        };
        self.evaluator.assess(scores, flags, config.as_ref())
    }

    fn deliver(
        &self,
        channel: NotificationChannel,
        patient: Option<&PatientContact>,
        template: &str,
        payload: &BTreeMap<String, String>,
        at: DateTime<Utc>,
    ) -> DeliveryLog {
        let recipient = patient.and_then(|contact| match channel {
            NotificationChannel::Email => contact.email.clone(),
            NotificationChannel::Whatsapp => contact.phone.clone(),
        });

        let Some(recipient) = recipient else {
            return DeliveryLog {
                channel,
                status: DeliveryStatus::Failed,
                detail: Some(format!("patient has no {} contact", channel.label())),
                sent_at: at,
                attempt_id: None,
            };
        };

        let notification = Notification {
            channel,
            recipient,
            template: template.to_string(),
            payload: payload.clone(),
        };

        match self.notifications.send(&notification) {
            Ok(receipt) => DeliveryLog {
                channel,
                status: DeliveryStatus::Sent,
                detail: None,
                sent_at: at,
                attempt_id: Some(receipt.attempt_id),
            },
            Err(error) => {
                warn!(%error, channel = channel.label(), template, "notification delivery failed");
                DeliveryLog {
                    channel,
                    status: DeliveryStatus::Failed,
                    detail: Some(error.to_string()),
                    sent_at: at,
                    attempt_id: None,
                }
            }
        }
    }

    fn notify_lab_result(&self, episode: &Episode, lab_result: &LabResult) -> bool {
        let patient = match self.directory.patient(&episode.patient_id) {
            Ok(patient) => patient,
            Err(error) => {
                warn!(%error, episode = %episode.code, "patient lookup failed, skipping notification");
                return false;
            }
        };

        let mut payload = BTreeMap::new();
        payload.insert(
            "patient_first_name".to_string(),
            patient
                .as_ref()
                .map(|contact| contact.first_name().to_string())
                .unwrap_or_default(),
        );
        payload.insert("episode_code".to_string(), episode.code.clone());
        payload.insert("provider".to_string(), lab_result.provider.clone());

        let log = self.deliver(
            NotificationChannel::Email,
            patient.as_ref(),
            "lab_results_available",
            &payload,
            lab_result.created_at,
        );
        log.status == DeliveryStatus::Sent
    }

    fn log_transition(&self, episode: &Episode, prior: EpisodeState, transition: Transition) {
        info!(
            episode = %episode.code,
            from = %prior,
            to = %episode.state,
            command = transition.name(),
            "episode transition applied"
        );
    }

    fn record_audit(&self, episode: &Episode, action: &str, actor: &Actor, diff: Option<Value>) {
        let entry = AuditEntry {
            entity: AUDIT_ENTITY.to_string(),
            entity_id: episode.id.0.clone(),
            action: action.to_string(),
            actor: actor.clone(),
            timestamp: Utc::now(),
            diff,
        };

        if let Err(error) = self.audit.record(entry) {
            warn!(%error, episode = %episode.code, action, "audit entry dropped");
        }
    }
}

/// Error raised by the episode service.
#[derive(Debug, thiserror::Error)]
pub enum EpisodeServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    InvalidState(#[from] LifecycleError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("episode was modified concurrently; reload and retry")]
    Conflict,
    #[error("dependency failed: {0}")]
    Dependency(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl EpisodeServiceError {
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::InvalidState(_) | Self::Validation(_)
        )
    }
}

impl From<RepositoryError> for EpisodeServiceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict => Self::Conflict,
            RepositoryError::NotFound => Self::NotFound("record".to_string()),
            RepositoryError::Unavailable(reason) => Self::Unavailable(reason),
        }
    }
}

impl From<RenderError> for EpisodeServiceError {
    fn from(value: RenderError) -> Self {
        Self::Dependency(value.to_string())
    }
}
