//! fgacheck-storage: tuple storage abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              fgacheck-storage               │
//! ├─────────────────────────────────────────────┤
//! │  traits.rs - DataStore trait & validation   │
//! │  memory.rs - In-memory implementation       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use memory::MemoryDataStore;
pub use traits::{DataStore, Store, StoredTuple, TupleFilter};
