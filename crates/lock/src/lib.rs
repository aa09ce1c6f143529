//! Lock coordination layer for arbiterdb
//!
//! This crate implements the reader/writer arbitration that keeps many
//! threads from touching one fragile engine connection type at the same
//! instant:
//! - [`LockArbiter`]: the shared Free → UpgradeableHeld → WriteHeld state
//!   machine, one per logical database
//! - [`TransactionLock`]: a per-connection, thread-affine session over an
//!   arbiter, with re-entrancy short-circuiting and RAII release guards
//! - [`LockRegistry`]: explicit name → arbiter map replacing hidden
//!   per-connection-type global state
//! - watchdog: background diagnostics for locks held past a threshold

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arbiter;
pub mod registry;
pub mod session;
mod watchdog;

pub use arbiter::{LockArbiter, LockConfig};
pub use registry::LockRegistry;
pub use session::{CommandGuard, ReaderGuard, TransactionLock, WriterGuard};
