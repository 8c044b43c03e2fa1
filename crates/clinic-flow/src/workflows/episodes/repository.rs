use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{
    Actor, DocumentRef, Episode, EpisodeId, EpisodeRecords, Extraction, ExtractionId,
    InstitutionId, InstitutionProfile, NotificationChannel, PatientContact, PatientId,
    ProfessionalId, ProfessionalProfile, SideRecord, TestCatalogEntry,
};

/// Episode storage. `insert` and `save_all` must persist the episode and its
/// side records atomically; `save_all` rejects writes based on a stale `version`.
pub trait EpisodeRepository: Send + Sync {
    fn insert(&self, episode: Episode, records: Vec<SideRecord>)
        -> Result<Episode, RepositoryError>;
    fn fetch(&self, id: &EpisodeId) -> Result<Option<Episode>, RepositoryError>;
    fn save_all(
        &self,
        episode: &Episode,
        records: Vec<SideRecord>,
    ) -> Result<Episode, RepositoryError>;
    fn fetch_extraction(&self, id: &ExtractionId) -> Result<Option<Extraction>, RepositoryError>;
    fn records(&self, id: &EpisodeId) -> Result<EpisodeRecords, RepositoryError>;
    fn list(&self, filter: &EpisodeFilter) -> Result<Vec<Episode>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Listing filter; results are newest first and capped at `limit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeFilter {
    #[serde(default)]
    pub institution_id: Option<InstitutionId>,
    #[serde(default)]
    pub professional_id: Option<ProfessionalId>,
    #[serde(default = "EpisodeFilter::default_limit")]
    pub limit: usize,
}

impl EpisodeFilter {
    pub const MAX_LIMIT: usize = 100;

    fn default_limit() -> usize {
        Self::MAX_LIMIT
    }

    pub fn matches(&self, episode: &Episode) -> bool {
        let institution_ok = self
            .institution_id
            .as_ref()
            .map_or(true, |id| &episode.institution_id == id);
        let professional_ok = self
            .professional_id
            .as_ref()
            .map_or(true, |id| episode.responsible_professional.as_ref() == Some(id));
        institution_ok && professional_ok
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.min(Self::MAX_LIMIT)
    }

    /// Applies ordering and the cap to an unordered candidate set.
    pub fn select(&self, candidates: impl IntoIterator<Item = Episode>) -> Vec<Episode> {
        let mut selected: Vec<Episode> = candidates
            .into_iter()
            .filter(|episode| self.matches(episode))
            .collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        selected.truncate(self.effective_limit());
        selected
    }
}

impl Default for EpisodeFilter {
    fn default() -> Self {
        Self {
            institution_id: None,
            professional_id: None,
            limit: Self::MAX_LIMIT,
        }
    }
}

/// Read-only lookups of the entities an episode refers to.
pub trait ClinicDirectory: Send + Sync {
    fn patient(&self, id: &PatientId) -> Result<Option<PatientContact>, RepositoryError>;
    fn institution(&self, id: &InstitutionId)
        -> Result<Option<InstitutionProfile>, RepositoryError>;
    fn professional(
        &self,
        id: &ProfessionalId,
    ) -> Result<Option<ProfessionalProfile>, RepositoryError>;
    fn test(&self, code: &str) -> Result<Option<TestCatalogEntry>, RepositoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    MedicalOrder,
    IntegratedReport,
}

impl DocumentKind {
    pub const fn slug(self) -> &'static str {
        match self {
            Self::MedicalOrder => "medical-order",
            Self::IntegratedReport => "integrated-report",
        }
    }
}

/// Content handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRequest {
    pub kind: DocumentKind,
    pub episode_code: String,
    pub title: String,
    pub lines: Vec<String>,
}

pub trait DocumentRenderer: Send + Sync {
    fn render(&self, request: &DocumentRequest) -> Result<DocumentRef, RenderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("document storage failed: {0}")]
    Storage(String),
    #[error("document template rejected content: {0}")]
    Template(String),
}

/// Templated outbound message to a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub channel: NotificationChannel,
    pub recipient: String,
    pub template: String,
    pub payload: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    pub attempt_id: String,
}

pub trait NotificationDispatcher: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<DeliveryReceipt, DispatchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{} channel is disabled", .0.label())]
    ChannelDisabled(NotificationChannel),
    #[error("notification transport failed: {0}")]
    Transport(String),
}

/// Audit trail entry written after each successful command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Value>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
    /// Entries for one entity, ordered by timestamp.
    fn history(&self, entity: &str, entity_id: &str) -> Result<Vec<AuditEntry>, AuditError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit log unavailable: {0}")]
    Unavailable(String),
}
