//! Site auditing engine: reachability (404) checks, duplicate-content
//! detection, on-page SEO extraction and a bounded same-site crawler,
//! all driven through a headless Chrome.

pub mod audit;
pub mod browser;
pub mod cli;
pub mod crawler;
pub mod error;
pub mod utils;

pub use audit::{AuditRequest, AuditTarget, Auditor, CheckOutcome, CheckResults, Checks};
pub use error::{AuditError, CheckFailure, Result};
