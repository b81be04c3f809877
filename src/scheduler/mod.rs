//! Task dispatch, execution and collection over three queues.
//!
//! - **TaskBuilder**: turns URLs or a batch file into tasks
//! - **Boss**: dispatches tasks and collects their responses
//! - **Thuglet**: claims one task at a time and runs the analyzer on it
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐
//!    │     Boss     │──────────────┐
//!    └──────┬───────┘              │
//!           │ publish              │ claim + ack
//!    ┌──────▼───────┐       ┌──────┴───────┐
//!    │  task queue  │       │  resp queue  │◀──────────────┐
//!    └──────┬───────┘       └──────────────┘               │
//!           │ claim                                        │
//!         ┌─┴─────────────────┬───────────────────┐        │
//!         ▼                   ▼                   ▼        │
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐   │
//!    │Thuglet 1│         │Thuglet 2│         │Thuglet N│───┤
//!    └─────────┘         └─────────┘         └─────────┘   │
//!                                                  ┌───────┴──────┐
//!                          timeouts and failures ─▶│  skip queue  │
//!                                                  └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use thugd::channel::RedisChannel;
//! use thugd::config::QueueNames;
//! use thugd::scheduler::{Boss, TaskBuilder};
//!
//! let channel = Arc::new(RedisChannel::connect("redis://localhost:6379", "boss").await?);
//!
//! let mut builder = TaskBuilder::new();
//! builder.load_input(["example.com"], Some("-T 30"), Some(1800));
//!
//! let mut boss = Boss::new(channel, QueueNames::default());
//! boss.add_tasks(builder.into_tasks());
//! boss.dispatch().await?;
//! let summary = boss.collect().await?;
//! ```
//!
//! # Routing
//!
//! - **Success**: response only
//! - **Timeout**: response, plus the original message on the skip queue
//! - **Failure**: original message on the skip queue, no response
//!
//! The task is acknowledged in every case, after routing.

pub mod boss;
pub mod builder;
pub mod task;
pub mod worker;

pub use boss::{Boss, CollectSummary, PrintResponse, ResponseHandler};
pub use builder::{split_opts, BatchFile, TaskBuilder};
pub use task::{netloc, normalize_url, task_id, task_id_at, Response, Task, TaskOutcome};
pub use worker::Thuglet;
