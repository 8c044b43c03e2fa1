//! Episode lifecycle engine: the state machine, its ports and the HTTP surface.

pub mod commands;
pub mod domain;
pub mod lifecycle;
pub mod repository;
pub mod router;
pub mod service;
pub mod urgency;
pub mod views;

#[cfg(test)]
mod tests;

pub use commands::{
    ExtractionRequest, ExtractionStatusUpdate, IntegratedReportRequest, LabResultSubmission,
    MedicalOrderRequest, ProposalRequest, PsychClearance, ReferralNote, SendProposalRequest,
    SurveySubmission, TestSubmission,
};
pub use domain::{
    Actor, Affiliation, DeliveryLog, DeliveryStatus, DocumentRef, Episode, EpisodeAssignment,
    EpisodeDraft, EpisodeId, EpisodeRecords, EpisodeState, Extraction, ExtractionId,
    ExtractionStatus, InstitutionId, InstitutionParameters, InstitutionProfile,
    IntegratedReport, LabResult, MedicalOrder, Milestone, NotificationChannel, OrderItem,
    PatientContact, PatientId, ProfessionalId, ProfessionalProfile, RecordId,
    SampleComplexity, SideRecord, Survey, TestCatalogEntry, TestResult, TherapyProposal,
};
pub use lifecycle::{LifecycleError, Transition};
pub use repository::{
    AuditEntry, AuditError, AuditSink, ClinicDirectory, DeliveryReceipt, DispatchError,
    DocumentKind, DocumentRenderer, DocumentRequest, EpisodeFilter, EpisodeRepository,
    Notification, NotificationDispatcher, RenderError, RepositoryError,
};
pub use router::{episode_router, ACTOR_HEADER};
pub use service::{EpisodeCollaborators, EpisodeService, EpisodeServiceError};
pub use urgency::{urgency_for, SlaStage, SlaTable, UrgencyTier};
pub use views::{
    EpisodeDetailView, EpisodeView, LabResultOutcome, MilestoneView, RecordOutcome,
    TestResultOutcome,
};
