use chrono::Utc;
use clinic_flow::workflows::episodes::{
    Affiliation, AuditEntry, AuditError, AuditSink, ClinicDirectory, DeliveryReceipt,
    DispatchError, DocumentRef, DocumentRenderer, DocumentRequest, Episode, EpisodeFilter,
    EpisodeId, EpisodeRecords, EpisodeRepository, Extraction, ExtractionId, InstitutionId,
    InstitutionParameters, InstitutionProfile, Notification, NotificationChannel,
    NotificationDispatcher, PatientContact, PatientId, ProfessionalId, ProfessionalProfile,
    RenderError, RepositoryError, SideRecord, TestCatalogEntry,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

pub(crate) const DEMO_INSTITUTION: &str = "inst-north";
pub(crate) const DEMO_PATIENT: &str = "pat-001";
pub(crate) const DEMO_PROFESSIONAL: &str = "pro-001";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
struct EpisodeStore {
    episodes: HashMap<EpisodeId, Episode>,
    records: HashMap<EpisodeId, EpisodeRecords>,
}

/// Episodes and side records behind a single lock, so a transition and its
/// records land together.
#[derive(Default, Clone)]
pub(crate) struct InMemoryEpisodeRepository {
    store: Arc<Mutex<EpisodeStore>>,
}

impl EpisodeRepository for InMemoryEpisodeRepository {
    fn insert(
        &self,
        episode: Episode,
        records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError> {
        let mut guard = self.store.lock().expect("repository mutex poisoned");
        if guard.episodes.contains_key(&episode.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.episodes.insert(episode.id.clone(), episode.clone());
        let entry = guard.records.entry(episode.id.clone()).or_default();
        for record in records {
            entry.absorb(record);
        }
        Ok(episode)
    }

    fn fetch(&self, id: &EpisodeId) -> Result<Option<Episode>, RepositoryError> {
        let guard = self.store.lock().expect("repository mutex poisoned");
        Ok(guard.episodes.get(id).cloned())
    }

    fn save_all(
        &self,
        episode: &Episode,
        records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError> {
        let mut guard = self.store.lock().expect("repository mutex poisoned");
        let current = guard
            .episodes
            .get(&episode.id)
            .ok_or(RepositoryError::NotFound)?;
        if current.version != episode.version {
            return Err(RepositoryError::Conflict);
        }

        let mut stored = episode.clone();
        stored.version += 1;
        guard.episodes.insert(stored.id.clone(), stored.clone());
        let entry = guard.records.entry(stored.id.clone()).or_default();
        for record in records {
            entry.absorb(record);
        }
        Ok(stored)
    }

    fn fetch_extraction(&self, id: &ExtractionId) -> Result<Option<Extraction>, RepositoryError> {
        let guard = self.store.lock().expect("repository mutex poisoned");
        Ok(guard
            .records
            .values()
            .flat_map(|records| records.extractions.iter())
            .find(|extraction| &extraction.id == id)
            .cloned())
    }

    fn records(&self, id: &EpisodeId) -> Result<EpisodeRecords, RepositoryError> {
        let guard = self.store.lock().expect("repository mutex poisoned");
        Ok(guard.records.get(id).cloned().unwrap_or_default())
    }

    fn list(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>, RepositoryError> {
        let guard = self.store.lock().expect("repository mutex poisoned");
        Ok(filter.select(guard.episodes.values().cloned()))
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryDirectory {
    patients: HashMap<PatientId, PatientContact>,
    institutions: HashMap<InstitutionId, InstitutionProfile>,
    professionals: HashMap<ProfessionalId, ProfessionalProfile>,
    tests: HashMap<String, TestCatalogEntry>,
}

impl InMemoryDirectory {
    /// One institution, patient and psychologist plus the standard test catalog.
    pub(crate) fn seeded() -> Self {
        let enabled_tests = json!({
            "active": ["DASS-21", "PSS-10", "STAI"],
            "config_bypass": {
                "rule_mode": "AND",
                "tests": [
                    { "code": "DASS21_TOTAL", "operator": "<=", "threshold": 40 },
                    { "code": "PSS10_TOTAL", "operator": "<=", "threshold": 19 },
                    { "code": "STAI_STATE", "operator": "<=", "threshold": 39, "optional": true }
                ]
            }
        });
        let slas = json!({
            "psych_to_physician_hours": 48,
            "order_to_extraction_hours": 72,
            "extraction_to_results_days": 5
        });

        let institution = InstitutionProfile {
            id: InstitutionId(DEMO_INSTITUTION.to_string()),
            name: "North Logistics".to_string(),
            parameters: InstitutionParameters::from_bundles(&enabled_tests, &slas),
        };
        let patient = PatientContact {
            id: PatientId(DEMO_PATIENT.to_string()),
            full_name: "Marta Gomez".to_string(),
            email: Some("marta.gomez@example.com".to_string()),
            phone: Some("+5491155550101".to_string()),
        };
        let professional = ProfessionalProfile {
            id: ProfessionalId(DEMO_PROFESSIONAL.to_string()),
            full_name: "Lucia Lopez".to_string(),
            specialty: "Occupational psychology".to_string(),
            affiliations: vec![Affiliation {
                institution_id: institution.id.clone(),
                active: true,
            }],
        };

        let tests = [
            ("DASS-21", "Depression Anxiety Stress Scales"),
            ("PSS-10", "Perceived Stress Scale"),
            ("STAI", "State-Trait Anxiety Inventory"),
            ("BDI-II", "Beck Depression Inventory"),
            ("MBI", "Maslach Burnout Inventory"),
        ]
        .into_iter()
        .map(|(code, name)| {
            (
                code.to_string(),
                TestCatalogEntry {
                    code: code.to_string(),
                    name: name.to_string(),
                    version: "1.0".to_string(),
                },
            )
        })
        .collect();

        Self {
            patients: HashMap::from([(patient.id.clone(), patient)]),
            institutions: HashMap::from([(institution.id.clone(), institution)]),
            professionals: HashMap::from([(professional.id.clone(), professional)]),
            tests,
        }
    }
}

impl ClinicDirectory for InMemoryDirectory {
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

/// Writes plain-text documents under the configured storage directory.
#[derive(Clone)]
pub(crate) struct StorageDocumentRenderer {
    root: PathBuf,
}

impl StorageDocumentRenderer {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl DocumentRenderer for StorageDocumentRenderer {
    fn render(&self, request: &DocumentRequest) -> Result<DocumentRef, RenderError> {
        if request.lines.is_empty() {
            return Err(RenderError::Template(format!(
                "{} has no content",
                request.title
            )));
        }

        let rendered_at = Utc::now();
        let directory = self.root.join(&request.episode_code);
        std::fs::create_dir_all(&directory)
            .map_err(|err| RenderError::Storage(err.to_string()))?;

        let path = directory.join(format!(
            "{}-{}.txt",
            request.kind.slug(),
            rendered_at.format("%Y%m%d%H%M%S%3f")
        ));
        let mut body = format!("{}\n{}\n\n", request.title, request.episode_code);
        for line in &request.lines {
            body.push_str(line);
            body.push('\n');
        }
        std::fs::write(&path, body).map_err(|err| RenderError::Storage(err.to_string()))?;

        Ok(DocumentRef {
            path: path.display().to_string(),
            rendered_at,
        })
    }
}

/// Logs outbound messages instead of calling a provider. WhatsApp is gated by
/// configuration.
pub(crate) struct TracingNotificationDispatcher {
    whatsapp_enabled: bool,
    attempts: AtomicU64,
}

impl TracingNotificationDispatcher {
    pub(crate) fn new(whatsapp_enabled: bool) -> Self {
        Self {
            whatsapp_enabled,
            attempts: AtomicU64::new(1),
        }
    }
}

impl NotificationDispatcher for TracingNotificationDispatcher {
    fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, DispatchError> {
        if notification.channel == NotificationChannel::Whatsapp && !self.whatsapp_enabled {
            return Err(DispatchError::ChannelDisabled(notification.channel));
        }

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        let attempt_id = format!("msg-{attempt:06}");
        info!(
            channel = notification.channel.label(),
            template = %notification.template,
            %attempt_id,
            "notification dispatched"
        );
        Ok(DeliveryReceipt { attempt_id })
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut guard = self.entries.lock().expect("audit mutex poisoned");
        guard.push(entry);
        Ok(())
    }

    fn history(&self, entity: &str, entity_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        let guard = self.entries.lock().expect("audit mutex poisoned");
        Ok(guard
            .iter()
            .filter(|entry| entry.entity == entity && entry.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
