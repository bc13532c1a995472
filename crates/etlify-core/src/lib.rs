//! The synchronization engine: Digest, Registry, Adapter contract,
//! Model Binding, SyncState/PendingDependency persistence, Dependency
//! Resolver, Stale Finder, Synchronizer, BatchSync and Deleter
//! (spec.md §2).
//!
//! `etlify-core` consumes a serializer interface (`Record`/`Serializer`
//! in [`binding`]) and an SQL-capable store; it does not prescribe how
//! those are built (spec.md §1). Reference adapters live in the sibling
//! `etlify-adapters` crate; the Job Layer lives in `etlify-manager`.

#![allow(unknown_lints)]

pub mod adapter;
pub mod batch;
pub mod binding;
pub mod context;
pub mod deleter;
pub mod digest;
pub mod enqueue;
pub mod error;
mod lock;
pub mod pending;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod stale;
pub mod sync_state;
pub mod synchronizer;
mod time;

pub use adapter::{Adapter, AdapterError, AdapterResult, Payload};
pub use batch::{BatchOptions, BatchStats, BatchSync, RecordLoader};
pub use binding::{
    BindingRegistry, DependencyEdge, ModelBinding, ModelBindingBuilder, ParentRef, Record,
    Serializer, StructuralSerializer,
};
pub use context::EngineContext;
pub use deleter::{DeleteOutcome, Deleter};
pub use digest::{DigestStrategy, Sha256CanonicalJson};
pub use enqueue::{Enqueuer, NullEnqueuer};
pub use error::{EtlifyError, Result};
pub use pending::{PendingRow, PendingStore};
pub use registry::{CrmEntry, CrmOptions, CrmRegistry};
pub use resolver::{DependencyCheck, DependencyResolver, MissingParent};
pub use schema::EtlifyConnectionInitializer;
pub use stale::{Dialect, JoinHop, StaleAssociation, StaleFinder};
pub use sync_state::{SyncStateRow, SyncStateStore};
pub use synchronizer::{AttemptOutcome, Synchronizer};
