//! fgacheck-domain: check resolution for relationship-based access control.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               fgacheck-domain               │
//! ├─────────────────────────────────────────────┤
//! │  model/     - Authorization model & types   │
//! │  condition/ - CEL condition evaluation      │
//! │  resolver/  - Check resolver chain          │
//! │  cache/     - Check query cache             │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod condition;
pub mod error;
pub mod model;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use cache::{CheckCacheConfig, CheckCacheKey, CheckQueryCache};
pub use error::{DomainError, DomainResult};
pub use model::{AuthorizationModel, TupleKey, TypeSystem};
pub use resolver::{
    CheckResolver, CheckResolverBuilder, CheckResolverChain, ResolutionContext,
    ResolveCheckRequest, ResolveCheckResponse, TupleReader,
};
