//! Metrics module for Prometheus-based monitoring.
//!
//! Covers the task lifecycle on both sides of the queues: dispatch and
//! collection on the boss, execution outcomes on the thuglets.
//!
//! # Example
//!
//! ```ignore
//! use thugd::metrics::Metrics;
//!
//! let metrics = Metrics::new()?;
//! metrics.record_task("success", 12.5);
//! println!("{}", metrics.export());
//! ```

pub mod prometheus;

pub use self::prometheus::Metrics;
