//! Concurrent Executor
//!
//! Runs a built dependency tree (`graph::ProcessNode`) to completion: spawns
//! shell commands through [`spawner::Spawner`], schedules dependency/parallel
//! children via [`scheduler`], reports progress via [`progress`], then hands
//! the finished run to [`complete`] for post-run maintenance. See distilled
//! spec §4.4/§4.5/§4.6.

pub mod command;
pub mod complete;
pub mod progress;
pub mod scheduler;
pub mod spawner;

pub use complete::CompletionSummary;
pub use scheduler::{CancelFlag, ExecNode, ExecutionReport, TransitionReport};
pub use spawner::{ChildSpawner, RecordingSpawner, SpawnOutput, Spawner};
