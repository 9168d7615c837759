//! The scenario runner: drives the scanner, linker, and comparator over a
//! directory corpus (offline) or a live transport session (online).
//!
//! This is the only component aware of directories, transports, or
//! scenario configuration — everything it calls is pure over its inputs
//! (§2).

use crate::comparator::{self, CompareConfig, DiffReport};
use crate::error::{ConfigError, RunError, TransportError};
use crate::job::JobHandle;
use crate::linker::{self, LinkerConfig, LogEntry};
use crate::model::FixMessage;
use crate::normalizer::NormalizerSpec;
use crate::parser;
use crate::scanner::{self, ScanConfig};
use crate::transport::{FixTransport, TransportRegistry, TransportSessionConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn default_msg_type_filter() -> BTreeSet<String> {
    ["D", "G", "F", "8", "3", "j"].into_iter().map(String::from).collect()
}

/// Report file naming, with `{scenario}` and `{timestamp}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConfig {
    /// Directory reports are written under.
    pub folder: PathBuf,
    /// Filename template for an online run's JSON report.
    pub run_online_json: String,
    /// Filename template for an online run's JUnit report, if any.
    pub run_online_junit: Option<String>,
    /// Filename template for an offline run's JSON report.
    pub run_offline_json: String,
    /// Filename template for an offline run's JUnit report, if any.
    pub run_offline_junit: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("reports"),
            run_online_json: "{scenario}-online-{timestamp}.json".to_string(),
            run_online_junit: None,
            run_offline_json: "{scenario}-offline-{timestamp}.json".to_string(),
            run_offline_junit: None,
        }
    }
}

/// Substitutes `{scenario}` and `{timestamp}` in `template`. A small pure
/// string-templating function, not a templating engine dependency (§10.3).
pub fn substitute_placeholders(template: &str, scenario: &str, timestamp: &str) -> String {
    template.replace("{scenario}", scenario).replace("{timestamp}", timestamp)
}

/// Serializable linker configuration, as it appears in a scenario file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkerConfigSpec {
    /// See [`LinkerConfig::candidate_tags`].
    pub candidate_tags: Option<Vec<u32>>,
    /// See [`LinkerConfig::candidate_combination_max_size`].
    pub candidate_combination_max_size: Option<usize>,
    /// See [`LinkerConfig::override_candidates`].
    #[serde(default)]
    pub overrides: BTreeMap<String, Vec<Vec<u32>>>,
    /// See [`LinkerConfig::normalizers`].
    #[serde(default)]
    pub normalizers: BTreeMap<u32, NormalizerSpec>,
}

impl LinkerConfigSpec {
    fn compile(&self) -> Result<LinkerConfig, ConfigError> {
        let defaults = LinkerConfig::default();
        let mut normalizers = BTreeMap::new();
        for (&tag, spec) in &self.normalizers {
            let compiled = spec.compile().map_err(|e| ConfigError::InvalidField {
                field: format!("linker.normalizers.{tag}"),
                reason: e.to_string(),
            })?;
            normalizers.insert(tag, compiled);
        }
        Ok(LinkerConfig {
            candidate_tags: self.candidate_tags.clone().unwrap_or(defaults.candidate_tags),
            candidate_combination_max_size: self
                .candidate_combination_max_size
                .unwrap_or(defaults.candidate_combination_max_size),
            override_candidates: self.overrides.clone(),
            normalizers,
            max_collisions: defaults.max_collisions,
        })
    }
}

/// Serializable comparator configuration, as it appears in a scenario file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareConfigSpec {
    /// See [`CompareConfig::excluded_tags`].
    pub default_exclude_tags: Option<Vec<u32>>,
    /// See [`CompareConfig::normalizers`].
    #[serde(default)]
    pub normalizers: BTreeMap<u32, NormalizerSpec>,
}

impl CompareConfigSpec {
    fn compile(&self) -> Result<CompareConfig, ConfigError> {
        let defaults = CompareConfig::default();
        let mut normalizers = BTreeMap::new();
        for (&tag, spec) in &self.normalizers {
            let compiled = spec.compile().map_err(|e| ConfigError::InvalidField {
                field: format!("compare.normalizers.{tag}"),
                reason: e.to_string(),
            })?;
            normalizers.insert(tag, compiled);
        }
        Ok(CompareConfig {
            excluded_tags: self
                .default_exclude_tags
                .clone()
                .map(|v| v.into_iter().collect())
                .unwrap_or(defaults.excluded_tags),
            normalizers,
        })
    }
}

/// The declarative scenario file shape, deserialized directly with serde.
/// Compiled once into a runtime [`ScenarioConfig`] via [`ScenarioConfigSpec::compile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfigSpec {
    /// Directory of per-session `<session>.in` request logs.
    pub input_folder: PathBuf,
    /// Directory of per-session `<session>.out` expected response logs.
    pub expected_folder: PathBuf,
    /// Directory of per-session `<session>.out` actual response logs, if
    /// comparing against a previously captured run.
    pub actual_folder: Option<PathBuf>,
    /// Allowed msgTypes; messages of any other type are ignored entirely.
    #[serde(default = "default_msg_type_filter")]
    pub msg_type_filter: BTreeSet<String>,
    /// Linker configuration.
    #[serde(default)]
    pub linker: LinkerConfigSpec,
    /// Comparator configuration.
    #[serde(default)]
    pub compare: CompareConfigSpec,
    /// Report output naming.
    #[serde(default)]
    pub reports: ReportConfig,
    /// Pass-through; semantics unspecified by any test (§9 open question).
    #[serde(default)]
    pub session_mapping_rules: Option<Vec<serde_json::Value>>,
}

impl ScenarioConfigSpec {
    /// Compiles this declarative spec into a runtime [`ScenarioConfig`],
    /// resolving and pre-compiling every normalizer.
    pub fn compile(&self) -> Result<ScenarioConfig, ConfigError> {
        Ok(ScenarioConfig {
            input_folder: self.input_folder.clone(),
            expected_folder: self.expected_folder.clone(),
            actual_folder: self.actual_folder.clone(),
            msg_type_filter: self.msg_type_filter.clone(),
            linker: self.linker.compile()?,
            compare: self.compare.compile()?,
            reports: self.reports.clone(),
            session_mapping_rules: self.session_mapping_rules.clone(),
            scan: ScanConfig::default(),
        })
    }
}

/// Runtime scenario configuration, produced by compiling a
/// [`ScenarioConfigSpec`] loaded from a scenario file.
#[derive(Clone)]
pub struct ScenarioConfig {
    /// Directory of per-session `<session>.in` request logs.
    pub input_folder: PathBuf,
    /// Directory of per-session `<session>.out` expected response logs.
    pub expected_folder: PathBuf,
    /// Directory of per-session `<session>.out` actual response logs.
    pub actual_folder: Option<PathBuf>,
    /// Allowed msgTypes.
    pub msg_type_filter: BTreeSet<String>,
    /// Linker configuration.
    pub linker: LinkerConfig,
    /// Comparator configuration.
    pub compare: CompareConfig,
    /// Report output naming.
    pub reports: ReportConfig,
    /// Pass-through scenario field.
    pub session_mapping_rules: Option<Vec<serde_json::Value>>,
    /// Scan tuning, currently fixed to defaults; not yet exposed in the
    /// declarative file format.
    pub scan: ScanConfig,
}

/// Loads and compiles a scenario configuration from a JSON file.
pub fn load_scenario_config(path: impl AsRef<Path>) -> Result<ScenarioConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let spec: ScenarioConfigSpec = serde_json::from_str(&text)?;
    spec.compile()
}

fn scan_to_entries(path: &Path, scan_config: &ScanConfig, allowed: &BTreeSet<String>) -> Result<Vec<LogEntry>, RunError> {
    let mut entries = Vec::new();
    let iter = scanner::scan(path, scan_config.clone())?;
    for (idx, raw) in iter.enumerate() {
        let raw = raw?;
        let message = parser::parse(&raw.payload);
        if let Some(mt) = message.msg_type() {
            if !allowed.is_empty() && !allowed.contains(mt) {
                continue;
            }
        }
        entries.push(LogEntry {
            line_number: (idx + 1) as u64,
            message,
        });
    }
    Ok(entries)
}

fn session_names(folder: &Path, suffix: &str) -> Result<Vec<String>, RunError> {
    let read_dir = std::fs::read_dir(folder).map_err(|source| RunError::Folder {
        path: folder.to_path_buf(),
        source,
    })?;
    let mut names = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| RunError::Folder {
            path: folder.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(session) = name.strip_suffix(suffix) {
                names.push(session.to_string());
            }
        }
    }
    names.sort();
    names.dedup();
    Ok(names)
}

/// The scenario runner.
pub struct ScenarioRunner {
    transports: TransportRegistry,
}

impl ScenarioRunner {
    /// Creates a runner backed by `transports` for online mode.
    pub fn new(transports: TransportRegistry) -> Self {
        Self { transports }
    }

    /// Drives one session's worth of offline diffing: scan the shared
    /// input corpus plus the session's expected/actual out-files, link
    /// in-against-expected-out to discover the correlation key, then
    /// match expected-out to actual-out by that same key and diff the
    /// pairs.
    fn diff_session(&self, config: &ScenarioConfig, session: &str, job: &JobHandle) -> Result<DiffReport, RunError> {
        let input_path = config.input_folder.join(format!("{session}.in"));
        let expected_path = config.expected_folder.join(format!("{session}.out"));

        let ins = scan_to_entries(&input_path, &config.scan, &config.msg_type_filter)?;
        let expected_outs = scan_to_entries(&expected_path, &config.scan, &config.msg_type_filter)?;

        let expected_link_report = linker::Linker::discover(&config.linker, &ins, &expected_outs);

        let Some(actual_folder) = &config.actual_folder else {
            // Nothing to diff against; report zero comparisons.
            return Ok(comparator::build_report(Vec::new(), expected_outs.len(), 0, 0, 0));
        };
        let actual_path = actual_folder.join(format!("{session}.out"));
        let actual_outs = scan_to_entries(&actual_path, &config.scan, &config.msg_type_filter)?;

        let mut diffs = Vec::new();
        let mut matched_keys: BTreeSet<String> = BTreeSet::new();

        for (msg_type, strategy) in &expected_link_report.strategies {
            let expected_index = linker::index_by_key(&expected_outs, &config.linker, &strategy.tags);
            let actual_index = linker::index_by_key(&actual_outs, &config.linker, &strategy.tags);

            for (key, expected_entry) in &expected_index {
                if job.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                if let Some(actual_entry) = actual_index.get(key) {
                    let diff_msg = comparator::diff(
                        &config.compare,
                        format!("{msg_type}:{key}"),
                        &expected_entry.message,
                        &actual_entry.message,
                    );
                    diffs.push(diff_msg);
                    matched_keys.insert(key.clone());
                }
            }
        }

        let unmatched_expected = expected_outs.len().saturating_sub(matched_keys.len());
        let unmatched_actual = actual_outs.len().saturating_sub(matched_keys.len());
        let ambiguous = expected_link_report.ambiguous;

        diffs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(comparator::build_report(diffs, unmatched_expected, unmatched_actual, ambiguous, 0))
    }

    /// Runs every session under `config.input_folder` offline, aggregating
    /// into one scenario-wide [`DiffReport`].
    pub async fn run_offline(&self, config: &ScenarioConfig, job: &JobHandle) -> Result<DiffReport, RunError> {
        let sessions = session_names(&config.input_folder, ".in")?;
        let mut all_messages = Vec::new();
        let mut unmatched_expected = 0;
        let mut unmatched_actual = 0;
        let mut ambiguous = 0;

        for session in sessions {
            if job.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            log::debug!("diffing session '{session}' offline");
            let report = self.diff_session(config, &session, job)?;
            unmatched_expected += report.unmatched_expected;
            unmatched_actual += report.unmatched_actual;
            ambiguous += report.ambiguous;
            all_messages.extend(report.messages);
        }

        if job.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        Ok(comparator::build_report(all_messages, unmatched_expected, unmatched_actual, ambiguous, 0))
    }

    /// Submits an offline run as a job: spawns the run on the current tokio
    /// runtime and returns immediately with a `RUNNING` [`JobHandle`] that
    /// transitions to `SUCCEEDED`/`FAILED` exactly once, per §4.5.
    pub fn submit_offline(self: Arc<Self>, config: ScenarioConfig) -> JobHandle {
        let job = JobHandle::new();
        let job_for_task = job.clone();
        tokio::spawn(async move {
            log::info!("job {} started (offline)", job_for_task.job_id());
            match self.run_offline(&config, &job_for_task).await {
                Ok(report) => match serde_json::to_value(&report) {
                    Ok(value) => {
                        log::info!("job {} succeeded", job_for_task.job_id());
                        job_for_task.succeed(value);
                    }
                    Err(e) => {
                        log::error!("job {} failed to serialize report: {e}", job_for_task.job_id());
                        job_for_task.fail(e.to_string());
                    }
                },
                Err(e) => {
                    log::warn!("job {} failed: {e}", job_for_task.job_id());
                    job_for_task.fail(e.to_string());
                }
            }
        });
        job
    }

    /// Runs the scenario's single session online against a live transport:
    /// connect, replay every input message, wait for a correlated
    /// response, then diff the captured actual traffic against expected.
    pub async fn run_online(
        &self,
        config: &ScenarioConfig,
        transport_name: &str,
        session_config: TransportSessionConfig,
        receive_timeout: Duration,
        queue_capacity: usize,
        job: &JobHandle,
    ) -> Result<DiffReport, RunError> {
        let transport = self
            .transports
            .build(transport_name)
            .ok_or_else(|| RunError::Transport(TransportError::Connect(format!("no transport registered as '{transport_name}'"))))?;

        let queue = Arc::new(BoundedQueue::new(queue_capacity));
        let queue_for_callback = Arc::clone(&queue);
        transport.on_receive(Box::new(move |msg| queue_for_callback.push(msg)));

        log::info!("connecting to transport '{transport_name}'");
        transport.connect(session_config).await?;
        log::info!("connected to transport '{transport_name}'");

        let run_result = self.drive_online_session(config, transport.as_ref(), &queue, receive_timeout, job).await;

        transport.close().await?;
        log::info!("closed transport '{transport_name}'");
        run_result
    }

    /// Submits an online run as a job, mirroring [`ScenarioRunner::submit_offline`].
    pub fn submit_online(
        self: Arc<Self>,
        config: ScenarioConfig,
        transport_name: String,
        session_config: TransportSessionConfig,
        receive_timeout: Duration,
        queue_capacity: usize,
    ) -> JobHandle {
        let job = JobHandle::new();
        let job_for_task = job.clone();
        tokio::spawn(async move {
            log::info!("job {} started (online)", job_for_task.job_id());
            let result = self
                .run_online(&config, &transport_name, session_config, receive_timeout, queue_capacity, &job_for_task)
                .await;
            match result {
                Ok(report) => match serde_json::to_value(&report) {
                    Ok(value) => {
                        log::info!("job {} succeeded", job_for_task.job_id());
                        job_for_task.succeed(value);
                    }
                    Err(e) => {
                        log::error!("job {} failed to serialize report: {e}", job_for_task.job_id());
                        job_for_task.fail(e.to_string());
                    }
                },
                Err(e) => {
                    log::warn!("job {} failed: {e}", job_for_task.job_id());
                    job_for_task.fail(e.to_string());
                }
            }
        });
        job
    }

    async fn drive_online_session(
        &self,
        config: &ScenarioConfig,
        transport: &dyn FixTransport,
        queue: &Arc<BoundedQueue>,
        receive_timeout: Duration,
        job: &JobHandle,
    ) -> Result<DiffReport, RunError> {
        let sessions = session_names(&config.input_folder, ".in")?;
        let mut actual_messages: Vec<FixMessage> = Vec::new();
        let mut sent_count = 0usize;

        for session in sessions {
            let input_path = config.input_folder.join(format!("{session}.in"));
            let ins = scan_to_entries(&input_path, &config.scan, &config.msg_type_filter)?;
            for entry in ins {
                if job.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                transport.send(entry.message).await?;
                sent_count += 1;
                if let Some(response) = queue.pop_timeout(receive_timeout).await {
                    actual_messages.push(response);
                }
            }
        }

        // Diff each captured actual message against the expected corpus of
        // the same msgType using the linker's per-type candidate tags, the
        // same way offline mode correlates expected/actual.
        let actual_entries: Vec<LogEntry> = actual_messages
            .into_iter()
            .enumerate()
            .map(|(i, message)| LogEntry {
                line_number: (i + 1) as u64,
                message,
            })
            .collect();

        let sessions = session_names(&config.expected_folder, ".out")?;
        let mut expected_entries = Vec::new();
        for session in sessions {
            let path = config.expected_folder.join(format!("{session}.out"));
            expected_entries.extend(scan_to_entries(&path, &config.scan, &config.msg_type_filter)?);
        }

        let mut diffs = Vec::new();
        let mut by_type_expected: BTreeMap<String, Vec<&LogEntry>> = BTreeMap::new();
        let mut by_type_actual: BTreeMap<String, Vec<&LogEntry>> = BTreeMap::new();
        for e in &expected_entries {
            if let Some(mt) = e.message.msg_type() {
                by_type_expected.entry(mt.to_string()).or_default().push(e);
            }
        }
        for e in &actual_entries {
            if let Some(mt) = e.message.msg_type() {
                by_type_actual.entry(mt.to_string()).or_default().push(e);
            }
        }

        let mut matched = 0;
        for (msg_type, expected_list) in &by_type_expected {
            let tags = config
                .linker
                .override_candidates
                .get(msg_type)
                .and_then(|c| c.first())
                .cloned()
                .unwrap_or_else(|| config.linker.candidate_tags.clone());
            let actual_list = by_type_actual.get(msg_type).map(Vec::as_slice).unwrap_or(&[]);
            let expected_owned: Vec<LogEntry> = expected_list.iter().map(|e| (*e).clone()).collect();
            let actual_owned: Vec<LogEntry> = actual_list.iter().map(|e| (*e).clone()).collect();
            let expected_index = linker::index_by_key(&expected_owned, &config.linker, &tags);
            let actual_index = linker::index_by_key(&actual_owned, &config.linker, &tags);
            for (key, expected_entry) in &expected_index {
                if job.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                if let Some(actual_entry) = actual_index.get(key) {
                    diffs.push(comparator::diff(
                        &config.compare,
                        format!("{msg_type}:{key}"),
                        &expected_entry.message,
                        &actual_entry.message,
                    ));
                    matched += 1;
                }
            }
        }

        let unmatched_expected = expected_entries.len().saturating_sub(matched);
        let unmatched_actual = actual_entries.len().saturating_sub(matched);
        let overflow = queue.overflow_count();
        if overflow > 0 {
            log::warn!("online receive queue dropped {overflow} message(s) on overflow");
        }
        log::info!("online run sent {sent_count} messages, matched {matched} responses");

        diffs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(comparator::build_report(diffs, unmatched_expected, unmatched_actual, 0, overflow))
    }
}

/// A bounded, multi-producer/single-consumer queue with a drop-oldest
/// policy on overflow, used to buffer messages pushed by a transport's
/// receive callback (§5).
struct BoundedQueue {
    capacity: usize,
    inner: Mutex<VecDeque<FixMessage>>,
    overflow: std::sync::atomic::AtomicUsize,
    notify: Notify,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
            overflow: std::sync::atomic::AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    fn push(&self, message: FixMessage) {
        let mut guard = self.inner.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.overflow.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        guard.push_back(message);
        drop(guard);
        self.notify.notify_one();
    }

    /// Count of messages dropped due to overflow since construction.
    fn overflow_count(&self) -> usize {
        self.overflow.load(std::sync::atomic::Ordering::Relaxed)
    }

    async fn pop_timeout(&self, timeout: Duration) -> Option<FixMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut guard = self.inner.lock();
                if let Some(msg) = guard.pop_front() {
                    return Some(msg);
                }
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let remaining = deadline - now;
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_substitution_replaces_both_tokens() {
        let out = substitute_placeholders("{scenario}-{timestamp}.json", "smoke", "20260728-120000000");
        assert_eq!(out, "smoke-20260728-120000000.json");
    }

    #[test]
    fn scenario_spec_compiles_with_defaults() {
        let spec = ScenarioConfigSpec {
            input_folder: PathBuf::from("in"),
            expected_folder: PathBuf::from("expected"),
            actual_folder: None,
            msg_type_filter: default_msg_type_filter(),
            linker: LinkerConfigSpec::default(),
            compare: CompareConfigSpec::default(),
            reports: ReportConfig::default(),
            session_mapping_rules: None,
        };
        let compiled = spec.compile().expect("compiles");
        assert_eq!(compiled.linker.candidate_tags, vec![11, 41, 37, 17, 55, 54, 60]);
        assert_eq!(compiled.compare.excluded_tags.len(), 7);
    }

    #[test]
    fn scenario_spec_rejects_bad_normalizer_regex() {
        let mut normalizers = BTreeMap::new();
        normalizers.insert(
            11,
            NormalizerSpec::RegexReplace {
                pattern: "(".to_string(),
                replacement: "x".to_string(),
            },
        );
        let spec = ScenarioConfigSpec {
            input_folder: PathBuf::from("in"),
            expected_folder: PathBuf::from("expected"),
            actual_folder: None,
            msg_type_filter: default_msg_type_filter(),
            linker: LinkerConfigSpec {
                normalizers,
                ..Default::default()
            },
            compare: CompareConfigSpec::default(),
            reports: ReportConfig::default(),
            session_mapping_rules: None,
        };
        assert!(spec.compile().is_err());
    }

    #[tokio::test]
    async fn bounded_queue_drops_oldest_on_overflow() {
        let queue = BoundedQueue::new(2);
        queue.push(parser::parse(b"35=D\x01"));
        queue.push(parser::parse(b"35=G\x01"));
        queue.push(parser::parse(b"35=F\x01"));
        assert_eq!(queue.overflow_count(), 1);
        let first = queue.pop_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.msg_type(), Some("G"));
    }

    #[tokio::test]
    async fn pop_timeout_returns_none_when_empty() {
        let queue = BoundedQueue::new(2);
        let result = queue.pop_timeout(Duration::from_millis(20)).await;
        assert!(result.is_none());
    }
}
