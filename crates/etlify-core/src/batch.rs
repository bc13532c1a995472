//! BatchSync: walks the Stale Finder output per (Model, CRM) and either
//! enqueues one job per id or calls the Synchronizer inline (spec.md
//! §4.8).

use std::collections::HashMap;

use etlify_interrupt_support::Interruptee;
use rusqlite::Connection;

use crate::binding::Record;
use crate::context::EngineContext;
use crate::error::Result;
use crate::stale::{Dialect, StaleFinder};
use crate::synchronizer::Synchronizer;

/// Loads a concrete [`Record`] by `(model_name, resource_id)` for inline
/// dispatch. BatchSync never needs this in `async` mode, where it only
/// enqueues ids — the Job Layer's own worker is responsible for loading
/// the record (spec.md §4.7: "If the target record cannot be found, the
/// worker is a no-op").
pub trait RecordLoader: Send + Sync {
    fn load(&self, model_name: &str, resource_id: i64) -> Option<Box<dyn Record>>;
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub models: Option<Vec<String>>,
    pub crm_name: Option<String>,
    pub batch_size: usize,
    /// `true` (the default, spec.md §4.8): enqueue one job per stale id.
    /// `false`: call the Synchronizer inline on the caller's thread.
    pub async_mode: bool,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self {
            models: None,
            crm_name: None,
            batch_size: 500,
            async_mode: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub total: usize,
    pub per_model: HashMap<String, usize>,
    pub errors: usize,
}

pub struct BatchSync;

impl BatchSync {
    pub async fn run(
        ctx: &EngineContext,
        conn: &Connection,
        loader: &dyn RecordLoader,
        options: &BatchOptions,
        interruptee: &dyn Interruptee,
    ) -> Result<BatchStats> {
        let mut stats = BatchStats::default();
        let batch_size = if options.batch_size == 0 { 500 } else { options.batch_size };

        for (model_name, crm_name) in ctx.bindings.pairs() {
            if let Some(models) = &options.models {
                if !models.iter().any(|m| m == &model_name) {
                    continue;
                }
            }
            if let Some(wanted_crm) = &options.crm_name {
                if wanted_crm != &crm_name {
                    continue;
                }
            }
            let binding = match ctx.bindings.get(&model_name, &crm_name) {
                Some(b) => b,
                None => continue,
            };

            interruptee.err_if_interrupted()?;
            let finder = StaleFinder::new(conn, Dialect::Sqlite);
            let max_errors = ctx.max_sync_errors_for(&crm_name);
            let ids = finder.stale_ids(&binding, max_errors, interruptee)?;

            for chunk in ids.chunks(batch_size) {
                for &id in chunk {
                    interruptee.err_if_interrupted()?;
                    if options.async_mode {
                        ctx.enqueuer.enqueue(&model_name, id, &crm_name);
                    } else {
                        match loader.load(&model_name, id) {
                            None => continue,
                            Some(record) => {
                                if let Err(_err) =
                                    Synchronizer::attempt_inline(ctx, conn, record.as_ref(), &crm_name).await
                                {
                                    stats.errors += 1;
                                }
                            }
                        }
                    }
                    stats.total += 1;
                    *stats.per_model.entry(model_name.clone()).or_insert(0) += 1;
                }
            }
        }

        Ok(stats)
    }
}
