//! Clinical episode workflows: the lifecycle engine, the physician-bypass
//! eligibility evaluator and the supporting configuration and telemetry.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
