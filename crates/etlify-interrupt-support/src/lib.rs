//! Helps manage "interruptable" things across the workspace's crates: the
//! Stale Finder's batch scan and BatchSync's enqueue loop both check these
//! periodically so a host application can cancel a long-running sweep.

mod scopes;

pub use scopes::InterruptScope;

/// Something that is interruptable. In practice, this will almost certainly
/// be `Sync + Send`, as it is typically created on one thread, but
/// `.interrupt()` will be called from a different thread.
pub trait Interruptable {
    /// Take some action when interrupted.
    fn interrupt(&self);
}

/// Represents the state of something that may be interrupted. Decoupled from
/// `Interruptable` so that things which want to check if they have been
/// interrupted don't need to know about the interrupt mechanics.
pub trait Interruptee {
    fn was_interrupted(&self) -> bool;

    fn err_if_interrupted(&self) -> std::result::Result<(), Interrupted> {
        if self.was_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

/// A convenience implementation, should only be used in tests.
pub struct NeverInterrupts;

impl Interruptee for NeverInterrupts {
    #[inline]
    fn was_interrupted(&self) -> bool {
        false
    }
}

/// The error returned by `err_if_interrupted`.
#[derive(Debug, thiserror::Error)]
#[error("the operation was interrupted")]
pub struct Interrupted;
