//! # Voltammetry Worker
//!
//! Sample-file store, device sequencing and the worker-process protocol of a
//! potentiostat control application.
//!
//! ## Features
//!
//! - **Sample Store**: JSON sample documents with structural validation and
//!   atomic replacement on disk
//! - **Mutations**: a closed set of named save commands, including the
//!   replicate → run → method cascade delete
//! - **Device Sequencing**: relay bracketing and voltage-range selection for
//!   method step lists
//! - **Worker Protocol**: prefixed line framing over stdout and stderr,
//!   decoded into a single success, partial-success or failure outcome
//! - **Orchestration**: one worker in flight per sample window, with
//!   success/error callbacks and a busy indicator
//!
//! ## Architecture
//!
//! ```text
//! SampleWindow → Orchestrator → worker process (read | save | overwrite | export | run)
//!      ↑                               ↓                        ↓
//!  callbacks  ←  WorkerOutcome  ←  STA/DAT/POR/REL + payload   sample file / potentiostat
//! ```

/// Worker command line.
pub mod cli;
/// Configuration management.
pub mod config;
/// Explicit context handed to worker operations.
pub mod context;
/// Potentiostat driver seam, descriptors and the run executor.
pub mod device;
/// Error types and result aliases for the application.
pub mod error;
/// CSV export of replicates.
pub mod export;
/// Named mutations of sample documents.
pub mod mutation;
/// Single-flight worker dispatch for sample windows.
pub mod orchestrator;
/// Interactive side of live device runs.
pub mod run;
/// Relay bracketing and voltage-range resolution.
pub mod sequencer;
/// Sample document model and persistence.
pub mod store;
/// Worker requests, framing, process lifecycle and outcomes.
pub mod worker;

pub use config::Config;
pub use context::AppContext;
pub use error::{AppError, AppResult};
pub use orchestrator::{Orchestrator, SampleWindow};
pub use worker::{WorkerOutcome, WorkerRequest};
