pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{AssetOutcome, IngestionOrchestrator, IngestionReport, DEFAULT_TOP_N};
pub use scheduler::spawn_ingestion_scheduler;
