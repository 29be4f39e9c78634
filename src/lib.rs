// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod fingerprint;
pub mod model;
pub mod registry;
pub mod store;
pub mod trend;

// Multi-strategy content extraction (feed, structured page, aggressive page, search)
pub mod extract;

// Reasoning-backed analysis with rule-based fallback
pub mod analyze;

// Orchestration
pub mod monitor;
pub mod scheduler;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use analyze::{AnalysisEngine, PRIMARY_CONFIDENCE_FLOOR};
pub use extract::Extractor;
pub use fingerprint::{Fingerprint, FingerprintStore};
pub use model::{
    Analysis, AnalysisMethod, CompanyContext, Finding, Impact, OriginKind, Priority, Source,
    Update,
};
pub use monitor::{CycleReport, MonitoringEngine, SourceStatus};
pub use registry::{NewSource, RegistryError, SourceRegistry};
pub use trend::{Direction, TrendAccumulator, TrendError};
