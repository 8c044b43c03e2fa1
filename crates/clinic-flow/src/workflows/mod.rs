pub mod dashboard;
pub mod eligibility;
pub mod episodes;
pub mod scoresheet;
