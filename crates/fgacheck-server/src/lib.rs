//! fgacheck-server: composition of the check engine
//!
//! This crate wires the domain resolver chain to storage and configuration:
//! - Configuration loading (defaults, YAML file, environment)
//! - Logging initialisation
//! - Storage adapter implementing the resolver's tuple reader
//! - `CheckService`, which owns the resolver chain and runs checks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               fgacheck-server               │
//! ├─────────────────────────────────────────────┤
//! │  config.rs        - Configuration           │
//! │  observability.rs - Logging setup           │
//! │  adapters.rs      - DataStore → TupleReader │
//! │  service.rs       - CheckService            │
//! └─────────────────────────────────────────────┘
//! ```

pub mod adapters;
pub mod config;
pub mod observability;
pub mod service;

// Re-exports for convenience
pub use adapters::DataStoreTupleReader;
pub use config::{ConfigLoadError, ServerConfig};
pub use observability::init_logging;
pub use service::{
    CheckRequest, CheckResponse, CheckService, CheckServiceError, CheckServiceResult,
};
