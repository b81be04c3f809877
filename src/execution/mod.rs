//! Supervised execution of the analysis tool.
//!
//! The analyzer is an opaque external command. This layer only knows how to
//! launch it, bound its running time, and capture what it printed.
//!
//! # Lifecycle
//!
//! ```text
//! SPAWN → POLL (every interval) → EXITED
//!                 │
//!                 └─ timeout → SIGTERM → (grace) → SIGKILL → EXITED
//! ```
//!
//! # Example
//!
//! ```ignore
//! use thugd::execution::Supervisor;
//!
//! let supervisor = Supervisor::new("thug").with_kill_grace(Duration::from_secs(5));
//! let run = supervisor.run(&task, Duration::from_secs(1800)).await?;
//! println!("rc={} timed_out={}", run.rc, run.timed_out);
//! ```

pub mod supervisor;

pub use supervisor::{exit_code, Execution, Supervisor};
