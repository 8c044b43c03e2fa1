use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{ExtractionStatus, NotificationChannel, OrderItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSubmission {
    pub test_code: String,
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub interpretation: Option<String>,
    /// Flags observed during the session; only used for the bypass hint.
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralNote {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsychClearance {
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalOrderRequest {
    pub items: Vec<OrderItem>,
    pub destination: String,
    pub signed_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub scheduled_for: NaiveDate,
    pub time_slot: String,
    #[serde(default)]
    pub phlebotomist: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStatusUpdate {
    pub status: ExtractionStatus,
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResultSubmission {
    pub document_path: String,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    pub provider: String,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub send_to_patient: bool,
    #[serde(default)]
    pub billed_to_insurer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegratedReportRequest {
    #[serde(default = "default_report_kind")]
    pub kind: String,
    pub signed_by: String,
    #[serde(default)]
    pub summary: Option<String>,
}

fn default_report_kind() -> String {
    "psychological".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub kind: String,
    pub details: String,
    #[serde(default)]
    pub configured_value: Option<f64>,
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub proposed_for: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendProposalRequest {
    #[serde(default = "default_channels")]
    pub channels: Vec<NotificationChannel>,
    #[serde(default)]
    pub proposal_link: Option<String>,
}

impl Default for SendProposalRequest {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            proposal_link: None,
        }
    }
}

fn default_channels() -> Vec<NotificationChannel> {
    vec![NotificationChannel::Email]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveySubmission {
    pub nps: i64,
    #[serde(default)]
    pub items: BTreeMap<String, Value>,
    #[serde(default)]
    pub comment: Option<String>,
}
