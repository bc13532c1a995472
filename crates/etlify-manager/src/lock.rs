//! EnqueueLock key construction (spec.md §3): `etlify:enqueue_lock:v2:
//! <Type>:<id>:<crm>`, TTL >= 15 minutes.

use std::time::Duration;

/// The required TTL floor; the Job Layer refuses to configure a shorter
/// one (spec.md §3: "TTL >= 15 minutes").
pub const MIN_LOCK_TTL: Duration = Duration::from_secs(15 * 60);

pub fn enqueue_lock_key(model_name: &str, resource_id: i64, crm_name: &str) -> String {
    format!("etlify:enqueue_lock:v2:{model_name}:{resource_id}:{crm_name}")
}
