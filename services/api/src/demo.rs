use crate::infra::{
    InMemoryAuditLog, InMemoryDirectory, InMemoryEpisodeRepository, StorageDocumentRenderer,
    TracingNotificationDispatcher, DEMO_INSTITUTION, DEMO_PATIENT, DEMO_PROFESSIONAL,
};
use chrono::{NaiveDate, Utc};
use clap::Args;
use clinic_flow::error::AppError;
use clinic_flow::workflows::episodes::{
    Actor, EpisodeCollaborators, EpisodeDraft, EpisodeFilter, EpisodeId, EpisodeService,
    EpisodeView, ExtractionRequest, ExtractionStatus, ExtractionStatusUpdate, InstitutionId,
    IntegratedReportRequest, LabResultSubmission, MedicalOrderRequest, OrderItem, PatientId,
    ProfessionalId, ProposalRequest, PsychClearance, ReferralNote, SampleComplexity,
    SendProposalRequest, SurveySubmission, TestSubmission,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

type DemoService = EpisodeService<InMemoryEpisodeRepository, InMemoryDirectory>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Directory for rendered documents (defaults to a temp directory)
    #[arg(long)]
    pub(crate) storage_dir: Option<PathBuf>,
    /// DASS-21 total submitted for the sample patient
    #[arg(long, default_value_t = 35.0)]
    pub(crate) dass_total: f64,
    /// PSS-10 total submitted for the sample patient
    #[arg(long, default_value_t = 15.0)]
    pub(crate) pss_total: f64,
    /// Refer to the physician even when the bypass rules allow skipping it
    #[arg(long)]
    pub(crate) force_referral: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        storage_dir,
        dass_total,
        pss_total,
        force_referral,
    } = args;

    let storage_dir = storage_dir.unwrap_or_else(|| std::env::temp_dir().join("clinic-flow-demo"));
    let service = EpisodeService::new(
        Arc::new(InMemoryEpisodeRepository::default()),
        Arc::new(InMemoryDirectory::seeded()),
        EpisodeCollaborators {
            documents: Arc::new(StorageDocumentRenderer::new(storage_dir.clone())),
            notifications: Arc::new(TracingNotificationDispatcher::new(false)),
            audit: Arc::new(InMemoryAuditLog::default()),
        },
    );
    let psychologist = Actor(DEMO_PROFESSIONAL.to_string());

    println!("Occupational health episode demo");
    let episode = service.create(
        EpisodeDraft {
            patient_id: PatientId(DEMO_PATIENT.to_string()),
            institution_id: InstitutionId(DEMO_INSTITUTION.to_string()),
            responsible_professional: Some(ProfessionalId(DEMO_PROFESSIONAL.to_string())),
            title: "Annual stress screening".to_string(),
            notes: None,
        },
        &psychologist,
    )?;
    println!("- Opened {} ({})", episode.code, episode.state_label);

    let mut scores = BTreeMap::new();
    scores.insert("DASS21_TOTAL".to_string(), dass_total);
    scores.insert("PSS10_TOTAL".to_string(), pss_total);
    let outcome = service.submit_test_result(
        &episode.id,
        TestSubmission {
            test_code: "DASS-21".to_string(),
            scores,
            interpretation: None,
            flags: BTreeMap::new(),
        },
        &psychologist,
    )?;
    println!(
        "- Test result stored; bypass {}",
        if outcome.bypass_suggested {
            "suggested"
        } else {
            "not suggested"
        }
    );
    for check in &outcome.assessment.checks {
        println!(
            "  - {} {} {} -> {}",
            check.code,
            check.operator,
            check.threshold,
            check.outcome.label()
        );
    }

    if outcome.bypass_suggested && !force_referral {
        service.close_psych_no_referral(&episode.id, PsychClearance::default(), &psychologist)?;
        println!("- Cleared by psychology, physician consult skipped");
    } else {
        run_medical_path(&service, &episode.id)?;
    }

    let report = service.create_integrated_report(
        &episode.id,
        IntegratedReportRequest {
            kind: "psychological".to_string(),
            signed_by: "Lucia Lopez".to_string(),
            summary: Some("Screening complete".to_string()),
        },
        &psychologist,
    )?;
    println!(
        "- Integrated report {} written to {}",
        report.record.version, report.record.document.path
    );

    service.create_proposal(
        &episode.id,
        ProposalRequest {
            kind: "stress_management_workshop".to_string(),
            details: "Four group sessions".to_string(),
            configured_value: None,
            accepted: false,
            proposed_for: None,
        },
        &psychologist,
    )?;
    let sent = service.send_proposal(&episode.id, SendProposalRequest::default(), &psychologist)?;
    for delivery in &sent.record.deliveries {
        println!(
            "- Proposal via {}: {:?}{}",
            delivery.channel.label(),
            delivery.status,
            delivery
                .detail
                .as_deref()
                .map(|detail| format!(" ({detail})"))
                .unwrap_or_default()
        );
    }

    let closed = service.register_survey(
        &episode.id,
        SurveySubmission {
            nps: 9,
            items: BTreeMap::new(),
            comment: None,
        },
        &psychologist,
    )?;
    render_milestones(&closed.episode);
    render_dashboard(&service)?;

    Ok(())
}

fn run_medical_path(service: &DemoService, id: &EpisodeId) -> Result<(), AppError> {
    let physician = Actor("dr-ruiz".to_string());
    service.derive_to_physician(
        id,
        ReferralNote {
            note: Some("Scores above institutional thresholds".to_string()),
        },
        &physician,
    )?;
    println!("- Referred to physician");

    let order = service.issue_medical_order(
        id,
        MedicalOrderRequest {
            items: vec![OrderItem {
                code: "660189".to_string(),
                name: "Cortisol".to_string(),
                complexity: SampleComplexity::Common,
                price: 21000.0,
                requires_authorization: false,
            }],
            destination: "Central Lab".to_string(),
            signed_by: "Dr. Ruiz".to_string(),
        },
        &physician,
    )?;
    println!(
        "- Medical order issued ({} item, document {})",
        order.record.items.len(),
        order.record.document.path
    );

    let scheduled_for = Utc::now().date_naive() + chrono::Duration::days(2);
    let extraction = service.schedule_extraction(
        id,
        ExtractionRequest {
            scheduled_for,
            time_slot: "08:00-09:00".to_string(),
            phlebotomist: None,
        },
        &physician,
    )?;
    println!(
        "- Extraction scheduled for {}",
        format_date(extraction.record.scheduled_for)
    );

    for status in [
        ExtractionStatus::Collected,
        ExtractionStatus::SamplesInTransit,
        ExtractionStatus::ReceivedAtLab,
    ] {
        service.update_extraction_status(
            &extraction.record.id,
            ExtractionStatusUpdate {
                status,
                evidence: BTreeMap::new(),
            },
            &physician,
        )?;
        println!("  - Extraction {}", status.label());
    }

    let lab = service.register_lab_result(
        id,
        LabResultSubmission {
            document_path: "lab/cortisol.pdf".to_string(),
            values: BTreeMap::new(),
            provider: "Central Lab".to_string(),
            signed: true,
            send_to_patient: true,
            billed_to_insurer: false,
        },
        &physician,
    )?;
    println!(
        "- Lab results registered (patient notified: {})",
        lab.patient_notified
    );
    Ok(())
}

fn render_milestones(episode: &EpisodeView) {
    println!("\nMilestones for {}", episode.code);
    for milestone in &episode.milestones {
        println!(
            "  - {} {}",
            milestone.reached_at.format("%Y-%m-%d %H:%M:%S"),
            milestone.state_label
        );
    }
    println!(
        "Final state: {} | urgency {}",
        episode.state_label, episode.urgency_label
    );
}

fn render_dashboard(service: &DemoService) -> Result<(), AppError> {
    let dashboard = service.dashboard(
        &EpisodeFilter {
            institution_id: Some(InstitutionId(DEMO_INSTITUTION.to_string())),
            ..EpisodeFilter::default()
        },
        Utc::now(),
    )?;

    println!(
        "\nDashboard: {} episodes ({} open, {} closed)",
        dashboard.total, dashboard.open, dashboard.closed
    );
    if let Some(rate) = dashboard.bypass_rate_pct {
        println!("- Physician bypass rate: {rate:.0}%");
    }
    if let Some(rate) = dashboard.proposals_accepted_pct {
        println!("- Proposals accepted: {rate:.0}%");
    }
    for entry in &dashboard.turnaround {
        match entry.average_hours {
            Some(hours) => println!(
                "- {}: {:.1}h avg vs {}h SLA",
                entry.stage_label, hours, entry.sla_hours
            ),
            None => println!("- {}: no samples ({}h SLA)", entry.stage_label, entry.sla_hours),
        }
    }
    Ok(())
}

fn format_date(date: NaiveDate) -> String {
    date.format("%a %d %b %Y").to_string()
}
