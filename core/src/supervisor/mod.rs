//! Process supervision for `ab` runs
//!
//! The supervisor owns the lifecycle of every external process:
//! - Reserving a per-session slot so at most one process runs per session
//! - Spawning `ab` with piped output and classifying lines as they arrive
//! - Emitting periodic heartbeat events while the process is alive
//! - Forceful cancellation via an atomic flag plus a broadcast signal
//!
//! # Example
//!
//! ```ignore
//! use ab_bench_core::{ProcessSupervisor, SupervisorConfig, TrialConfig, RunOutcome};
//!
//! let supervisor = ProcessSupervisor::new(SupervisorConfig::default());
//! let config = TrialConfig::new("http://localhost:8080/", 100, 10);
//!
//! match supervisor.run(&config, "session-1", sink).await? {
//!     RunOutcome::Completed(result) => println!("{} req/s", result.requests_per_second),
//!     RunOutcome::Cancelled => println!("stopped"),
//! }
//! ```

mod executor;
mod registry;

pub use executor::{Availability, ProcessSupervisor, RunOutcome};
pub use registry::RunTicket;
