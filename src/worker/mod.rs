//! Crash-isolated worker subprocesses.
//!
//! Every client connection owns a pool of worker processes. Each worker is
//! the molbridge binary re-executed with `--internal-worker`; it runs
//! registered operations and talks to its supervisor over stdin/stdout.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │   Dispatcher    │
//!                     │ (per connection)│
//!                     └────────┬────────┘
//!                              │ WorkerPool
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!         │ (process  │  │ (process  │  │ (process  │
//!         │   group)  │  │   group)  │  │   group)  │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! # Features
//!
//! - **Process isolation**: a segfault or abort in a worker only kills that worker
//! - **Deadline recycling**: a timed-out call tears the whole pool down
//! - **Crash recovery**: dead workers are respawned on their next call

pub mod executor;
mod ipc;
mod pool;
mod proc;
mod protocol;
mod signals;
mod spawn;

pub use executor::run_worker_main;
pub use pool::{Outcome, PendingSubmission, PoolId, WorkerPool, WorkerPoolConfig, WorkerPoolStats};
pub use protocol::{WorkRequest, WorkResponse};
pub use signals::TerminationReason;
pub use spawn::{INTERNAL_WORKER_FLAG, WorkerCommand};
