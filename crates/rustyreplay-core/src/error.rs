//! Error types for the replay engine.
//!
//! Only structural and operational failures are represented here. Content
//! problems — a malformed field, an ambiguous link, a diff mismatch — are
//! never raised as errors; they are recorded as data in the relevant
//! report, per the recovery policy in the design notes.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while scanning a FIX log file.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The log file could not be opened at all.
    #[error("cannot open log file {path}: {source}")]
    Open {
        /// Path that could not be opened.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// An I/O error occurred mid-stream, after some messages were already
    /// emitted. Already-yielded messages remain valid.
    #[error("I/O error while scanning: {0}")]
    Io(#[from] io::Error),
    /// The scan configuration itself is invalid (e.g. chunk size too small).
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced while loading or validating a [`crate::runner::ScenarioConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The scenario file could not be read.
    #[error("cannot read scenario config at {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The scenario file contents could not be parsed as JSON.
    #[error("malformed scenario config: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A required field was missing or held an invalid value.
    #[error("invalid scenario config field '{field}': {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason.
        reason: String,
    },
}

/// Errors raised by a [`crate::transport::FixTransport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport could not establish a session.
    #[error("transport connect failed: {0}")]
    Connect(String),
    /// The transport could not accept a message for transmission.
    #[error("transport send failed: {0}")]
    Send(String),
    /// The transport was already closed.
    #[error("transport is closed")]
    Closed,
}

/// Top-level error for a single scenario run, aggregating per-component
/// failures the way [`ScanError`]/[`ConfigError`]/[`TransportError`] wrap
/// their own sources.
#[derive(Debug, Error)]
pub enum RunError {
    /// Failure while scanning an input or expected/actual log file.
    #[error(transparent)]
    Scan(#[from] ScanError),
    /// Failure while loading the scenario configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Failure in the online transport.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An input, expected, or actual folder does not exist or is not readable.
    #[error("cannot read folder {path}: {source}")]
    Folder {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The run was cancelled before completion.
    #[error("cancelled")]
    Cancelled,
}
