//! Compares paired expected/actual FIX messages and produces a structured
//! [`DiffReport`].

use crate::model::{latin1_to_string, FixMessage};
use crate::normalizer::Normalizer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Session-layer/volatile tags excluded from comparison by default:
/// `BeginString`, `BodyLength`, `CheckSum`, `MsgSeqNum`, `SendingTime`,
/// `PossDupFlag`, `OrigSendingTime`.
pub const DEFAULT_EXCLUDED_TAGS: [u32; 7] = [8, 9, 10, 34, 52, 60, 122];

/// Comparator configuration.
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// Tags never compared.
    pub excluded_tags: BTreeSet<u32>,
    /// Per-tag normalizer applied to both sides' values before comparing.
    pub normalizers: BTreeMap<u32, Normalizer>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            excluded_tags: DEFAULT_EXCLUDED_TAGS.into_iter().collect(),
            normalizers: BTreeMap::new(),
        }
    }
}

/// A pair of values that differ at the same tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuePair {
    /// Value from the expected side.
    pub expected: String,
    /// Value from the actual side.
    pub actual: String,
}

/// Diff outcome for one message pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffMessage {
    /// An identifier for this comparison (e.g. the correlation key).
    pub id: String,
    /// `msgType` of the pair, if both sides agree (else expected's).
    pub msg_type: String,
    /// `true` iff missing/extra/differing are all empty.
    pub passed: bool,
    /// Tags present only in expected, sorted ascending.
    pub missing_tags: Vec<u32>,
    /// Tags present only in actual, sorted ascending.
    pub extra_tags: Vec<u32>,
    /// Tags present on both sides but whose normalized values differ.
    pub differing_values: BTreeMap<u32, ValuePair>,
}

/// Aggregate diff outcome across an entire session or scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    /// Per-pair diffs, in the order they were compared.
    pub messages: Vec<DiffMessage>,
    /// Number of pairs successfully compared (regardless of pass/fail).
    pub matched_comparisons: usize,
    /// Expected messages with no actual counterpart.
    pub unmatched_expected: usize,
    /// Actual messages with no expected counterpart.
    pub unmatched_actual: usize,
    /// Comparisons that were ambiguous going in (propagated from the linker).
    pub ambiguous: usize,
    /// Number of pairs where `passed == false`.
    pub failed_messages: usize,
    /// Messages dropped from the online receive queue due to overflow.
    /// Always `0` for an offline run.
    pub queue_overflow: usize,
    /// `true` iff every message in `messages` passed.
    pub passed: bool,
}

/// Decodes `raw` as Latin-1, not lossy UTF-8: `from_utf8_lossy` maps every
/// invalid byte to the same U+FFFD character, which would make two
/// genuinely different non-UTF-8 values compare equal and falsely pass.
fn normalized(config: &CompareConfig, tag: u32, raw: &[u8]) -> String {
    let text = latin1_to_string(raw);
    match config.normalizers.get(&tag) {
        Some(n) => n.apply(&text),
        None => text,
    }
}

/// Diffs `expected` against `actual` under `config`, tagging the result
/// with `id`.
pub fn diff(config: &CompareConfig, id: impl Into<String>, expected: &FixMessage, actual: &FixMessage) -> DiffMessage {
    let mut universe: BTreeSet<u32> = expected.tags().collect();
    universe.extend(actual.tags());
    for excluded in &config.excluded_tags {
        universe.remove(excluded);
    }

    let mut missing_tags = Vec::new();
    let mut extra_tags = Vec::new();
    let mut differing_values = BTreeMap::new();

    for tag in universe {
        match (expected.get(tag), actual.get(tag)) {
            (Some(e), Some(a)) => {
                let e_norm = normalized(config, tag, e);
                let a_norm = normalized(config, tag, a);
                if e_norm != a_norm {
                    differing_values.insert(
                        tag,
                        ValuePair {
                            expected: e_norm,
                            actual: a_norm,
                        },
                    );
                }
            }
            (Some(_), None) => missing_tags.push(tag),
            (None, Some(_)) => extra_tags.push(tag),
            (None, None) => unreachable!("tag came from tags() of one side"),
        }
    }

    let passed = missing_tags.is_empty() && extra_tags.is_empty() && differing_values.is_empty();
    let msg_type = expected.msg_type().or_else(|| actual.msg_type()).unwrap_or("").to_string();

    DiffMessage {
        id: id.into(),
        msg_type,
        passed,
        missing_tags,
        extra_tags,
        differing_values,
    }
}

/// Builds a [`DiffReport`] from an already-diffed pair sequence plus the
/// linker's unmatched/ambiguous counts for the same session. `queue_overflow`
/// is always `0` for offline runs; online runs pass the receive queue's
/// drop-oldest counter (§7, error kind 6).
pub fn build_report(
    messages: Vec<DiffMessage>,
    unmatched_expected: usize,
    unmatched_actual: usize,
    ambiguous: usize,
    queue_overflow: usize,
) -> DiffReport {
    let failed_messages = messages.iter().filter(|m| !m.passed).count();
    let matched_comparisons = messages.len();
    let passed = failed_messages == 0;
    DiffReport {
        messages,
        matched_comparisons,
        unmatched_expected,
        unmatched_actual,
        ambiguous,
        failed_messages,
        queue_overflow,
        passed,
    }
}
