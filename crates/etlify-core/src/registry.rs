//! In-memory, process-wide table of registered CRMs (spec.md §4.2).
//!
//! Write-once-at-init, read-many under load — scoped to an explicit
//! struct rather than a process singleton, per spec.md §9's "no hidden
//! process-wide state" redesign note.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adapter::Adapter;

/// A registered CRM: its adapter instance plus free-form options
/// (`job_class`, `max_sync_errors`, spec.md §6).
#[derive(Clone)]
pub struct CrmEntry {
    pub adapter: Arc<dyn Adapter>,
    pub options: CrmOptions,
}

/// Per-CRM options. `max_sync_errors: None` means "inherit the global
/// default" (spec.md §9's open question: nil is treated as inherit).
#[derive(Debug, Clone, Default)]
pub struct CrmOptions {
    pub job_class: Option<String>,
    pub max_sync_errors: Option<u32>,
}

/// `{crm_name -> {adapter_instance, options}}`. Mutable only during
/// initialization; treated as read-only once the engine is serving
/// traffic.
#[derive(Default)]
pub struct CrmRegistry {
    entries: RwLock<HashMap<String, CrmEntry>>,
}

impl CrmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` (normalized via [`normalize_name`]). `adapter`
    /// MUST be an instance, never a bare type — the trait object already
    /// enforces this at the type level. Re-registering the same name
    /// replaces the prior entry; `options` is stored as an owned copy so
    /// the caller's own copy can't leak mutations into the registry.
    pub fn register(&self, name: &str, adapter: Arc<dyn Adapter>, options: CrmOptions) {
        self.entries
            .write()
            .insert(normalize_name(name), CrmEntry { adapter, options });
    }

    pub fn fetch(&self, name: &str) -> Option<CrmEntry> {
        self.entries.read().get(&normalize_name(name)).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

/// Canonical form for CRM names: lowercase, trimmed, so map lookups are
/// insensitive to caller casing.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
