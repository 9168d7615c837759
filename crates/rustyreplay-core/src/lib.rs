//! Deterministic FIX log scanning, linking, comparison and replay engine.
//!
//! This crate is the pure, directory/transport-unaware core described by
//! the workspace's design notes: a streaming log scanner, a deterministic
//! linker, a configurable comparator, and a scenario runner that composes
//! them over an offline corpus or a live transport session.

pub mod canon;
pub mod comparator;
pub mod error;
pub mod job;
pub mod linker;
pub mod model;
pub mod normalizer;
pub mod parser;
pub mod runner;
pub mod scanner;
pub mod transport;

pub use comparator::{diff, CompareConfig, DiffMessage, DiffReport};
pub use error::{ConfigError, RunError, ScanError, TransportError};
pub use job::{JobHandle, JobSnapshot, JobStatus};
pub use linker::{FixLink, LinkReport, Linker, LinkerConfig, LogEntry};
pub use model::{FixField, FixMessage, Tag};
pub use normalizer::{Normalizer, NormalizerSpec};
pub use runner::{load_scenario_config, ScenarioConfig, ScenarioConfigSpec, ScenarioRunner};
pub use scanner::{scan, Direction, RawMessage, ScanConfig};
pub use transport::{FixTransport, SessionKey, TransportRegistry, TransportSessionConfig};
