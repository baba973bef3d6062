//! Upload storage lifecycle.
//!
//! Every upload gets its own session directory named by a random UUID, so
//! concurrent uploads with the same file name never collide. Directories are
//! removed by background tasks after a grace period, and a periodic janitor
//! sweep removes any that were left behind.

pub mod cleanup;
mod session;

pub use cleanup::{
    CleanupHandle, CleanupOutcome, CleanupScheduler, remove_session_dir, spawn_janitor,
    sweep_orphans,
};
pub use session::{SessionGuard, UploadManager, UploadSession};
