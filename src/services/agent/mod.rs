pub mod investigator;
pub mod orchestrator;
pub mod session;

pub use investigator::{InvestigationReport, Investigator, ReportTool};
pub use orchestrator::Agent;
pub use session::Session;
