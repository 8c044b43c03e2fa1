use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::urgency::SlaTable;
use crate::workflows::eligibility::EligibilityConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpisodeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatientId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstitutionId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfessionalId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractionId(pub String);

/// Identifier shared by the remaining side records (orders, reports, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

/// User (or automation) issuing a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor(pub String);

impl Actor {
    pub fn system() -> Self {
        Self("system".to_string())
    }
}

/// Clinical and administrative phase of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeState {
    Created,
    PsychEvalInProgress,
    PsychOkNoReferral,
    ReferredToPhysician,
    LabOrderIssued,
    ExtractionScheduled,
    SamplesInTransit,
    LabAnalysisInProgress,
    LabResultsAvailable,
    IntegratedReportReady,
    ProposalIssued,
    FollowUp,
    Closed,
}

impl EpisodeState {
    pub const fn ordered() -> [Self; 13] {
        [
            Self::Created,
            Self::PsychEvalInProgress,
            Self::PsychOkNoReferral,
            Self::ReferredToPhysician,
            Self::LabOrderIssued,
            Self::ExtractionScheduled,
            Self::SamplesInTransit,
            Self::LabAnalysisInProgress,
            Self::LabResultsAvailable,
            Self::IntegratedReportReady,
            Self::ProposalIssued,
            Self::FollowUp,
            Self::Closed,
        ]
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::PsychEvalInProgress => "PSYCH_EVAL_IN_PROGRESS",
            Self::PsychOkNoReferral => "PSYCH_OK_NO_REFERRAL",
            Self::ReferredToPhysician => "REFERRED_TO_PHYSICIAN",
            Self::LabOrderIssued => "LAB_ORDER_ISSUED",
            Self::ExtractionScheduled => "EXTRACTION_SCHEDULED",
            Self::SamplesInTransit => "SAMPLES_IN_TRANSIT",
            Self::LabAnalysisInProgress => "LAB_ANALYSIS_IN_PROGRESS",
            Self::LabResultsAvailable => "LAB_RESULTS_AVAILABLE",
            Self::IntegratedReportReady => "INTEGRATED_REPORT_READY",
            Self::ProposalIssued => "PROPOSAL_ISSUED",
            Self::FollowUp => "FOLLOW_UP",
            Self::Closed => "CLOSED",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::PsychEvalInProgress => "Psychological evaluation in progress",
            Self::PsychOkNoReferral => "Psychologically cleared, no referral",
            Self::ReferredToPhysician => "Referred to physician",
            Self::LabOrderIssued => "Lab order issued",
            Self::ExtractionScheduled => "Extraction scheduled",
            Self::SamplesInTransit => "Samples in transit",
            Self::LabAnalysisInProgress => "Lab analysis in progress",
            Self::LabResultsAvailable => "Lab results available",
            Self::IntegratedReportReady => "Integrated report ready",
            Self::ProposalIssued => "Proposal issued",
            Self::FollowUp => "Follow-up",
            Self::Closed => "Closed",
        }
    }

    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for EpisodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub state: EpisodeState,
    pub reached_at: DateTime<Utc>,
}

/// A clinical case moving through the lifecycle. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub code: String,
    pub title: String,
    pub patient_id: PatientId,
    pub institution_id: InstitutionId,
    pub responsible_professional: Option<ProfessionalId>,
    pub created_by: Actor,
    pub created_at: DateTime<Utc>,
    pub state: EpisodeState,
    /// Append-only; one entry per state change.
    pub milestones: Vec<Milestone>,
    pub notes: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Episode {
    pub(crate) fn open(
        id: EpisodeId,
        code: String,
        draft: EpisodeDraft,
        created_by: Actor,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            code,
            title: draft.title,
            patient_id: draft.patient_id,
            institution_id: draft.institution_id,
            responsible_professional: draft.responsible_professional,
            created_by,
            created_at,
            state: EpisodeState::Created,
            milestones: vec![Milestone {
                state: EpisodeState::Created,
                reached_at: created_at,
            }],
            notes: draft.notes,
            closed_at: None,
            version: 0,
        }
    }

    /// First time each state was reached.
    pub fn milestone_map(&self) -> BTreeMap<EpisodeState, DateTime<Utc>> {
        let mut map = BTreeMap::new();
        for milestone in &self.milestones {
            map.entry(milestone.state).or_insert(milestone.reached_at);
        }
        map
    }

    pub fn first_reached(&self, state: EpisodeState) -> Option<DateTime<Utc>> {
        self.milestones
            .iter()
            .find(|milestone| milestone.state == state)
            .map(|milestone| milestone.reached_at)
    }

    pub fn has_reached(&self, state: EpisodeState) -> bool {
        self.milestones.iter().any(|milestone| milestone.state == state)
    }

    pub fn entered_current_state_at(&self) -> DateTime<Utc> {
        self.milestones
            .iter()
            .rev()
            .find(|milestone| milestone.state == self.state)
            .map(|milestone| milestone.reached_at)
            .unwrap_or(self.created_at)
    }
}

/// Creation request, checked against the clinic directory before opening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeDraft {
    pub patient_id: PatientId,
    pub institution_id: InstitutionId,
    #[serde(default)]
    pub responsible_professional: Option<ProfessionalId>,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_title() -> String {
    "Occupational health episode".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: RecordId,
    pub episode_id: EpisodeId,
    pub test_code: String,
    pub scores: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    pub recorded_by: Actor,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleComplexity {
    Common,
    HighComplexity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub code: String,
    pub name: String,
    pub complexity: SampleComplexity,
    pub price: f64,
    #[serde(default)]
    pub requires_authorization: bool,
}

/// Pointer to a rendered document held by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub path: String,
    pub rendered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalOrder {
    pub id: RecordId,
    pub episode_id: EpisodeId,
    pub items: Vec<OrderItem>,
    pub destination: String,
    pub signed_by: String,
    pub document: DocumentRef,
    pub created_at: DateTime<Utc>,
}

impl MedicalOrder {
    pub fn total_price(&self) -> f64 {
        self.items.iter().map(|item| item.price).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionStatus {
    Scheduled,
    Collected,
    SamplesInTransit,
    ReceivedAtLab,
    Cancelled,
}

impl ExtractionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Collected => "Collected",
            Self::SamplesInTransit => "Samples in transit",
            Self::ReceivedAtLab => "Received at lab",
            Self::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub id: ExtractionId,
    pub episode_id: EpisodeId,
    pub scheduled_for: NaiveDate,
    pub time_slot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phlebotomist: Option<String>,
    pub status: ExtractionStatus,
    pub evidence: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub id: RecordId,
    pub episode_id: EpisodeId,
    pub document_path: String,
    pub values: BTreeMap<String, Value>,
    pub provider: String,
    pub signed: bool,
    pub sent_to_patient: bool,
    pub billed_to_insurer: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedReport {
    pub id: RecordId,
    pub episode_id: EpisodeId,
    pub kind: String,
    pub version: String,
    pub signed_by: String,
    pub document: DocumentRef,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    #[serde(alias = "whats_app")]
    Whatsapp,
}

impl NotificationChannel {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub channel: NotificationChannel,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapyProposal {
    pub id: RecordId,
    pub episode_id: EpisodeId,
    pub kind: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configured_value: Option<f64>,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_for: Option<NaiveDate>,
    pub deliveries: Vec<DeliveryLog>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: RecordId,
    pub episode_id: EpisodeId,
    pub nps: u8,
    pub items: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Professional put in charge of an episode, with the role they cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeAssignment {
    pub id: RecordId,
    pub episode_id: EpisodeId,
    pub professional_id: ProfessionalId,
    pub professional_name: String,
    pub role: String,
    pub assigned_by: Actor,
    pub assigned_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Side record written together with an episode transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum SideRecord {
    TestResult(TestResult),
    MedicalOrder(MedicalOrder),
    Extraction(Extraction),
    LabResult(LabResult),
    IntegratedReport(IntegratedReport),
    TherapyProposal(TherapyProposal),
    Survey(Survey),
    Assignment(EpisodeAssignment),
}

/// Every side record attached to one episode, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecords {
    pub test_results: Vec<TestResult>,
    pub medical_orders: Vec<MedicalOrder>,
    pub extractions: Vec<Extraction>,
    pub lab_results: Vec<LabResult>,
    pub integrated_reports: Vec<IntegratedReport>,
    pub proposals: Vec<TherapyProposal>,
    pub surveys: Vec<Survey>,
    #[serde(default)]
    pub assignments: Vec<EpisodeAssignment>,
}

impl EpisodeRecords {
    /// Inserts a record, replacing an existing one with the same id.
    pub fn absorb(&mut self, record: SideRecord) {
        match record {
            SideRecord::TestResult(item) => upsert(&mut self.test_results, item, |r| &r.id),
            SideRecord::MedicalOrder(item) => upsert(&mut self.medical_orders, item, |r| &r.id),
            SideRecord::Extraction(item) => upsert(&mut self.extractions, item, |r| &r.id),
            SideRecord::LabResult(item) => upsert(&mut self.lab_results, item, |r| &r.id),
            SideRecord::IntegratedReport(item) => {
                upsert(&mut self.integrated_reports, item, |r| &r.id)
            }
            SideRecord::TherapyProposal(item) => upsert(&mut self.proposals, item, |r| &r.id),
            SideRecord::Survey(item) => upsert(&mut self.surveys, item, |r| &r.id),
            SideRecord::Assignment(item) => upsert(&mut self.assignments, item, |r| &r.id),
        }
    }
}

fn upsert<T, K: PartialEq>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> &K) {
    match items.iter().position(|existing| key(existing) == key(&item)) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientContact {
    pub id: PatientId,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl PatientContact {
    pub fn first_name(&self) -> &str {
        self.full_name.split_whitespace().next().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
    pub institution_id: InstitutionId,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfessionalProfile {
    pub id: ProfessionalId,
    pub full_name: String,
    pub specialty: String,
    pub affiliations: Vec<Affiliation>,
}

impl ProfessionalProfile {
    pub fn actively_affiliated_with(&self, institution: &InstitutionId) -> bool {
        self.affiliations
            .iter()
            .any(|affiliation| affiliation.active && &affiliation.institution_id == institution)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCatalogEntry {
    pub code: String,
    pub name: String,
    pub version: String,
}

/// Per-institution settings consumed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstitutionParameters {
    #[serde(default)]
    pub eligibility: Option<EligibilityConfig>,
    #[serde(default)]
    pub active_tests: Vec<String>,
    #[serde(default)]
    pub slas: SlaTable,
}

impl InstitutionParameters {
    /// Builds parameters from the raw enabled-tests and SLA bundles stored
    /// with an institution. The bypass rule set fails closed.
    pub fn from_bundles(enabled_tests: &Value, slas: &Value) -> Self {
        let eligibility = EligibilityConfig::from_enabled_tests(enabled_tests);
        let active_tests = enabled_tests
            .get("active")
            .and_then(Value::as_array)
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            eligibility,
            active_tests,
            slas: SlaTable::from_value(slas),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionProfile {
    pub id: InstitutionId,
    pub name: String,
    pub parameters: InstitutionParameters,
}
