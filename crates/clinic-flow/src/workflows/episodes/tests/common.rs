use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::workflows::eligibility::EligibilityConfig;
use crate::workflows::episodes::{
    episode_router, Actor, Affiliation, AuditEntry, AuditError, AuditSink, ClinicDirectory,
    DeliveryReceipt, DispatchError, DocumentRef, DocumentRenderer, DocumentRequest, Episode,
    EpisodeCollaborators, EpisodeDraft, EpisodeFilter, EpisodeId, EpisodeRecords,
    EpisodeRepository, EpisodeService, Extraction, ExtractionId, ExtractionRequest,
    InstitutionId, InstitutionParameters, InstitutionProfile, IntegratedReportRequest,
    LabResultSubmission, MedicalOrderRequest, Notification, NotificationDispatcher, OrderItem,
    PatientContact, PatientId, ProfessionalId, ProfessionalProfile, ProposalRequest,
    RenderError, RepositoryError, SampleComplexity, SideRecord, SlaTable, TestCatalogEntry,
    TestSubmission,
};

pub(super) const INSTITUTION: &str = "inst-north";
pub(super) const BARE_INSTITUTION: &str = "inst-bare";
pub(super) const PATIENT: &str = "pat-001";
pub(super) const PROFESSIONAL: &str = "pro-001";
pub(super) const INACTIVE_PROFESSIONAL: &str = "pro-002";

pub(super) fn actor() -> Actor {
    Actor("psy-lopez".to_string())
}

pub(super) fn draft() -> EpisodeDraft {
    EpisodeDraft {
        patient_id: PatientId(PATIENT.to_string()),
        institution_id: InstitutionId(INSTITUTION.to_string()),
        responsible_professional: Some(ProfessionalId(PROFESSIONAL.to_string())),
        title: "Annual occupational screening".to_string(),
        notes: None,
    }
}

pub(super) fn scores(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(code, value)| (code.to_string(), *value))
        .collect()
}

pub(super) fn test_submission(entries: &[(&str, f64)]) -> TestSubmission {
    TestSubmission {
        test_code: "DASS-21".to_string(),
        scores: scores(entries),
        interpretation: None,
        flags: BTreeMap::new(),
    }
}

pub(super) fn order_request() -> MedicalOrderRequest {
    MedicalOrderRequest {
        items: vec![
            OrderItem {
                code: "660189".to_string(),
                name: "Cortisol".to_string(),
                complexity: SampleComplexity::Common,
                price: 21000.0,
                requires_authorization: false,
            },
            OrderItem {
                code: "SER-PLA".to_string(),
                name: "Platelet serotonin".to_string(),
                complexity: SampleComplexity::HighComplexity,
                price: 65000.0,
                requires_authorization: true,
            },
        ],
        destination: "Central Lab".to_string(),
        signed_by: "Dr. Ruiz".to_string(),
    }
}

pub(super) fn extraction_request() -> ExtractionRequest {
    ExtractionRequest {
        scheduled_for: NaiveDate::from_ymd_opt(2025, 7, 14).expect("valid date"),
        time_slot: "08:00-09:00".to_string(),
        phlebotomist: Some("ext-007".to_string()),
    }
}

pub(super) fn lab_submission(send_to_patient: bool) -> LabResultSubmission {
    let mut values = BTreeMap::new();
    values.insert("cortisol".to_string(), Value::from(14.2));
    LabResultSubmission {
        document_path: "uploads/lab/result.pdf".to_string(),
        values,
        provider: "Central Lab".to_string(),
        signed: true,
        send_to_patient,
        billed_to_insurer: false,
    }
}

pub(super) fn report_request() -> IntegratedReportRequest {
    IntegratedReportRequest {
        kind: "psychological".to_string(),
        signed_by: "Lic. Lopez".to_string(),
        summary: Some("Stress markers within range".to_string()),
    }
}

pub(super) fn proposal_request() -> ProposalRequest {
    ProposalRequest {
        kind: "individual_therapy".to_string(),
        details: "Eight weekly sessions".to_string(),
        configured_value: Some(120000.0),
        accepted: false,
        proposed_for: None,
    }
}

#[derive(Default)]
struct Store {
    episodes: HashMap<EpisodeId, Episode>,
    records: HashMap<EpisodeId, EpisodeRecords>,
}

#[derive(Default)]
pub(super) struct MemoryRepository {
    store: Mutex<Store>,
}

impl MemoryRepository {
    pub(super) fn stored(&self, id: &EpisodeId) -> Episode {
        self.store
            .lock()
            .expect("repository mutex poisoned")
            .episodes
            .get(id)
            .cloned()
            .expect("episode stored")
    }
}

impl EpisodeRepository for MemoryRepository {
    fn insert(
        &self,
        episode: Episode,
        records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError> {
        let mut store = self.store.lock().expect("repository mutex poisoned");
        if store.episodes.contains_key(&episode.id) {
            return Err(RepositoryError::Conflict);
        }
        store.episodes.insert(episode.id.clone(), episode.clone());
        let entry = store.records.entry(episode.id.clone()).or_default();
        for record in records {
            entry.absorb(record);
        }
        Ok(episode)
    }

    fn fetch(&self, id: &EpisodeId) -> Result<Option<Episode>, RepositoryError> {
        let store = self.store.lock().expect("repository mutex poisoned");
        Ok(store.episodes.get(id).cloned())
    }

    fn save_all(
        &self,
        episode: &Episode,
        records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError> {
        let mut store = self.store.lock().expect("repository mutex poisoned");
        let current = store
            .episodes
            .get(&episode.id)
            .ok_or(RepositoryError::NotFound)?;
        if current.version != episode.version {
            return Err(RepositoryError::Conflict);
        }

        let mut stored = episode.clone();
        stored.version += 1;
        store.episodes.insert(stored.id.clone(), stored.clone());
        let entry = store.records.entry(stored.id.clone()).or_default();
        for record in records {
            entry.absorb(record);
        }
        Ok(stored)
    }

    fn fetch_extraction(&self, id: &ExtractionId) -> Result<Option<Extraction>, RepositoryError> {
        let store = self.store.lock().expect("repository mutex poisoned");
        Ok(store
            .records
            .values()
            .flat_map(|records| records.extractions.iter())
            .find(|extraction| &extraction.id == id)
            .cloned())
    }

    fn records(&self, id: &EpisodeId) -> Result<EpisodeRecords, RepositoryError> {
        let store = self.store.lock().expect("repository mutex poisoned");
        Ok(store.records.get(id).cloned().unwrap_or_default())
    }

    fn list(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>, RepositoryError> {
        let store = self.store.lock().expect("repository mutex poisoned");
        Ok(filter.select(store.episodes.values().cloned()))
    }
}

/// Reads succeed but every write loses the optimistic version check.
#[derive(Default)]
pub(super) struct RacingRepository {
    inner: MemoryRepository,
}

impl EpisodeRepository for RacingRepository {
    fn insert(
        &self,
        episode: Episode,
        records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError> {
        self.inner.insert(episode, records)
    }

    fn fetch(&self, id: &EpisodeId) -> Result<Option<Episode>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn save_all(
        &self,
        _episode: &Episode,
        _records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError> {
        Err(RepositoryError::Conflict)
    }

    fn fetch_extraction(&self, id: &ExtractionId) -> Result<Option<Extraction>, RepositoryError> {
        self.inner.fetch_extraction(id)
    }

    fn records(&self, id: &EpisodeId) -> Result<EpisodeRecords, RepositoryError> {
        self.inner.records(id)
    }

    fn list(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>, RepositoryError> {
        self.inner.list(filter)
    }
}

pub(super) struct UnavailableRepository;

impl EpisodeRepository for UnavailableRepository {
    fn insert(
        &self,
        _episode: Episode,
        _records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &EpisodeId) -> Result<Option<Episode>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn save_all(
        &self,
        _episode: &Episode,
        _records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch_extraction(
        &self,
        _id: &ExtractionId,
    ) -> Result<Option<Extraction>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn records(&self, _id: &EpisodeId) -> Result<EpisodeRecords, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list(&self, _filter: &EpisodeFilter) -> Result<Vec<Episode>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) struct MemoryDirectory {
    patients: HashMap<PatientId, PatientContact>,
    institutions: HashMap<InstitutionId, InstitutionProfile>,
    professionals: HashMap<ProfessionalId, ProfessionalProfile>,
    tests: HashMap<String, TestCatalogEntry>,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        let patient = PatientContact {
            id: PatientId(PATIENT.to_string()),
            full_name: "Marta Gomez".to_string(),
            email: Some("marta@example.com".to_string()),
            phone: None,
        };

        let institution = InstitutionProfile {
            id: InstitutionId(INSTITUTION.to_string()),
            name: "North Logistics".to_string(),
            parameters: InstitutionParameters {
                eligibility: Some(EligibilityConfig::standard()),
                active_tests: vec!["DASS-21".to_string(), "PSS-10".to_string()],
                slas: SlaTable::default(),
            },
        };
        let bare = InstitutionProfile {
            id: InstitutionId(BARE_INSTITUTION.to_string()),
            name: "Unconfigured Clinic".to_string(),
            parameters: InstitutionParameters::default(),
        };

        let professional = |id: &str, active: bool| ProfessionalProfile {
            id: ProfessionalId(id.to_string()),
            full_name: format!("Professional {id}"),
            specialty: "Psychology".to_string(),
            affiliations: vec![Affiliation {
                institution_id: InstitutionId(INSTITUTION.to_string()),
                active,
            }],
        };

        let tests = ["DASS-21", "PSS-10", "STAI"]
            .into_iter()
            .map(|code| {
                (
                    code.to_string(),
                    TestCatalogEntry {
                        code: code.to_string(),
                        name: code.to_string(),
                        version: "1.0".to_string(),
                    },
                )
            })
            .collect();

        Self {
            patients: HashMap::from([(patient.id.clone(), patient)]),
            institutions: HashMap::from([
                (institution.id.clone(), institution),
                (bare.id.clone(), bare),
            ]),
            professionals: HashMap::from([
                (
                    ProfessionalId(PROFESSIONAL.to_string()),
                    professional(PROFESSIONAL, true),
                ),
                (
                    ProfessionalId(INACTIVE_PROFESSIONAL.to_string()),
                    professional(INACTIVE_PROFESSIONAL, false),
                ),
            ]),
            tests,
        }
    }
}

impl MemoryDirectory {
    pub(super) fn with_patient_phone(phone: &str) -> Self {
        let mut directory = Self::default();
        if let Some(patient) = directory.patients.get_mut(&PatientId(PATIENT.to_string())) {
            patient.phone = Some(phone.to_string());
        }
        directory
    }
}

impl ClinicDirectory for MemoryDirectory {
    fn patient(&self, id: &PatientId) -> Result<Option<PatientContact>, RepositoryError> {
        Ok(self.patients.get(id).cloned())
    }

    fn institution(
        &self,
        id: &InstitutionId,
    ) -> Result<Option<InstitutionProfile>, RepositoryError> {
        Ok(self.institutions.get(id).cloned())
    }

    fn professional(
        &self,
        id: &ProfessionalId,
    ) -> Result<Option<ProfessionalProfile>, RepositoryError> {
        Ok(self.professionals.get(id).cloned())
    }

    fn test(&self, code: &str) -> Result<Option<TestCatalogEntry>, RepositoryError> {
        Ok(self.tests.get(code).cloned())
    }
}

#[derive(Default)]
pub(super) struct MemoryDocuments {
    rendered: Mutex<Vec<DocumentRequest>>,
    failing: bool,
}

impl MemoryDocuments {
    pub(super) fn failing() -> Self {
        Self {
            rendered: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub(super) fn rendered(&self) -> Vec<DocumentRequest> {
        self.rendered.lock().expect("documents mutex poisoned").clone()
    }
}

impl DocumentRenderer for MemoryDocuments {
    fn render(&self, request: &DocumentRequest) -> Result<DocumentRef, RenderError> {
        if self.failing {
            return Err(RenderError::Storage("disk full".to_string()));
        }
        let mut rendered = self.rendered.lock().expect("documents mutex poisoned");
        rendered.push(request.clone());
        Ok(DocumentRef {
            path: format!(
                "memory/{}/{}-{}.txt",
                request.episode_code,
                request.kind.slug(),
                rendered.len()
            ),
            rendered_at: Utc::now(),
        })
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: bool,
}

impl MemoryNotifier {
    pub(super) fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationDispatcher for MemoryNotifier {
    fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, DispatchError> {
        if self.failing {
            return Err(DispatchError::Transport("smtp timeout".to_string()));
        }
        let mut sent = self.sent.lock().expect("notifier mutex poisoned");
        sent.push(notification.clone());
        Ok(DeliveryReceipt {
            attempt_id: format!("attempt-{}", sent.len()),
        })
    }
}

#[derive(Default)]
pub(super) struct MemoryAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAudit {
    pub(super) fn actions(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("audit mutex poisoned")
            .iter()
            .map(|entry| entry.action.clone())
            .collect()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .expect("audit mutex poisoned")
            .push(entry);
        Ok(())
    }

    fn history(&self, entity: &str, entity_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self
            .entries
            .lock()
            .expect("audit mutex poisoned")
            .iter()
            .filter(|entry| entry.entity == entity && entry.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

pub(super) struct BrokenAudit;

impl AuditSink for BrokenAudit {
    fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Err(AuditError::Unavailable("audit store offline".to_string()))
    }

    fn history(&self, _entity: &str, _entity_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        Err(AuditError::Unavailable("audit store offline".to_string()))
    }
}

pub(super) struct Harness<R> {
    pub(super) service: EpisodeService<R, MemoryDirectory>,
    pub(super) repository: Arc<R>,
    pub(super) documents: Arc<MemoryDocuments>,
    pub(super) notifier: Arc<MemoryNotifier>,
    pub(super) audit: Arc<MemoryAudit>,
}

pub(super) fn harness_with<R>(
    repository: R,
    directory: MemoryDirectory,
    documents: MemoryDocuments,
    notifier: MemoryNotifier,
) -> Harness<R>
where
    R: EpisodeRepository + 'static,
{
    let repository = Arc::new(repository);
    let documents = Arc::new(documents);
    let notifier = Arc::new(notifier);
    let audit = Arc::new(MemoryAudit::default());
    let service = EpisodeService::new(
        repository.clone(),
        Arc::new(directory),
        EpisodeCollaborators {
            documents: documents.clone(),
            notifications: notifier.clone(),
            audit: audit.clone(),
        },
    );

    Harness {
        service,
        repository,
        documents,
        notifier,
        audit,
    }
}

pub(super) fn harness() -> Harness<MemoryRepository> {
    harness_with(
        MemoryRepository::default(),
        MemoryDirectory::default(),
        MemoryDocuments::default(),
        MemoryNotifier::default(),
    )
}

pub(super) fn open_episode<R>(harness: &Harness<R>) -> EpisodeId
where
    R: EpisodeRepository + 'static,
{
    harness
        .service
        .create(draft(), &actor())
        .expect("episode opens")
        .id
}

/// Drives a fresh episode up to `LAB_ORDER_ISSUED`.
pub(super) fn episode_with_order(harness: &Harness<MemoryRepository>) -> EpisodeId {
    let id = open_episode(harness);
    harness
        .service
        .submit_test_result(&id, test_submission(&[("DASS21_TOTAL", 52.0)]), &actor())
        .expect("test stored");
    harness
        .service
        .derive_to_physician(&id, Default::default(), &actor())
        .expect("referral");
    harness
        .service
        .issue_medical_order(&id, order_request(), &actor())
        .expect("order issued");
    id
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn router_with(harness: Harness<MemoryRepository>) -> axum::Router {
    episode_router(Arc::new(harness.service))
}
