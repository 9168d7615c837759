//! The deterministic linker: discovers, per FIX `msgType`, the minimal
//! combination of tags that uniquely pairs "in" messages with "out"
//! messages, then emits a stable, JSON-serializable [`LinkReport`].

use crate::model::FixMessage;
use crate::normalizer::Normalizer;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default maximum number of worst-offender collision examples kept per
/// ambiguous strategy.
pub const DEFAULT_MAX_COLLISIONS: usize = 5;

/// A line-numbered message, as read from a scannable log by the line-
/// oriented path.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// 1-based line number in the source file.
    pub line_number: u64,
    /// The parsed message.
    pub message: FixMessage,
}

/// Linker configuration.
#[derive(Debug, Clone)]
pub struct LinkerConfig {
    /// Tags considered as candidates when no override applies, in the
    /// fixed default preference order (iteration still sorts by tag
    /// number ascending within each combination).
    pub candidate_tags: Vec<u32>,
    /// Largest combination size to try when enumerating `candidate_tags`.
    pub candidate_combination_max_size: usize,
    /// Per-msgType tag-tuple override list, tried in order in place of
    /// default enumeration.
    pub override_candidates: BTreeMap<String, Vec<Vec<u32>>>,
    /// Per-tag value normalizer applied before keys are formed.
    pub normalizers: BTreeMap<u32, Normalizer>,
    /// Worst-offender collisions kept per ambiguous strategy.
    pub max_collisions: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            candidate_tags: vec![11, 41, 37, 17, 55, 54, 60],
            candidate_combination_max_size: 2,
            override_candidates: BTreeMap::new(),
            normalizers: BTreeMap::new(),
            max_collisions: DEFAULT_MAX_COLLISIONS,
        }
    }
}

/// Aggregate counters for a single strategy or for the whole report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounters {
    /// Number of keys with exactly one in-message and exactly one out-message.
    pub matched: usize,
    /// Number of in-only or out-only messages (never paired).
    pub unmatched: usize,
    /// Number of keys with more than one in-message or more than one out-message.
    pub ambiguous: usize,
}

/// The chosen strategy and outcome for one `msgType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgTypeStrategy {
    /// The tag combination chosen, in ascending order.
    pub tags: Vec<u32>,
    /// Outcome counters for this msgType alone.
    pub counters: LinkCounters,
}

/// One confirmed in/out pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixLink {
    /// `msgType` of both sides of the pair.
    pub msg_type: String,
    /// Line number of the "in" message.
    pub in_line: u64,
    /// Line number of the "out" message.
    pub out_line: u64,
    /// The canonical key (e.g. `"11=ORD-1"`) that matched them.
    pub key: String,
}

/// A worst-offender example for an ambiguous strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collision {
    /// `msgType` this collision belongs to.
    pub msg_type: String,
    /// The tag combination in use.
    pub tags: Vec<u32>,
    /// The colliding canonical key.
    pub key: String,
    /// Number of "in" messages sharing this key.
    pub in_count: usize,
    /// Number of "out" messages sharing this key.
    pub out_count: usize,
    /// Line numbers of participating "in" messages, ascending.
    pub in_lines: Vec<u64>,
    /// Line numbers of participating "out" messages, ascending.
    pub out_lines: Vec<u64>,
}

/// Full linking outcome: per-msgType strategies, emitted pairs, collision
/// examples, and aggregate counters. Serializes deterministically —
/// `BTreeMap` keys sort lexicographically and every `Vec` field here is
/// built in a pre-sorted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkReport {
    /// Chosen strategy per msgType, keyed by msgType string.
    pub strategies: BTreeMap<String, MsgTypeStrategy>,
    /// All confirmed pairs, sorted by (msgType, in_line).
    pub links: Vec<FixLink>,
    /// Worst-offender collisions, sorted by (msgType, combined multiplicity desc, key asc).
    pub collisions: Vec<Collision>,
    /// Sum of every msgType's counters.
    pub matched: usize,
    /// Sum of every msgType's counters.
    pub unmatched: usize,
    /// Sum of every msgType's counters.
    pub ambiguous: usize,
}

impl LinkReport {
    /// Serializes this report as stable, pretty-printed JSON. Byte-
    /// identical across runs given identical inputs, since all contained
    /// collections are built in sorted order before this is called.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Enumerates nonempty subsets of `tags` (already sorted ascending, no
/// duplicates) with size `1..=max_size`, ordered first by size ascending
/// then lexicographically by tuple.
fn enumerate_combinations(tags: &[u32], max_size: usize) -> Vec<Vec<u32>> {
    let mut sorted = tags.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut out = Vec::new();
    for size in 1..=max_size.min(sorted.len()) {
        let mut combo = Vec::with_capacity(size);
        enumerate_size(&sorted, size, 0, &mut combo, &mut out);
    }
    out
}

fn enumerate_size(pool: &[u32], size: usize, start: usize, combo: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
    if combo.len() == size {
        out.push(combo.clone());
        return;
    }
    for i in start..pool.len() {
        combo.push(pool[i]);
        enumerate_size(pool, size, i + 1, combo, out);
        combo.pop();
    }
}

fn apply_normalizer(config: &LinkerConfig, tag: u32, value: &str) -> String {
    match config.normalizers.get(&tag) {
        Some(n) => n.apply(value),
        None => value.to_string(),
    }
}

/// Builds the canonical key string for `msg` under tag combination `k`.
/// Returns `None` if `msg` lacks any tag in `k`.
///
/// Keys on [`FixMessage::get_latin1`] rather than `get_str`: FIX values are
/// opaque ISO-8859-1 bytes, not UTF-8 (spec §3), so a candidate tag whose
/// value happens to contain a non-UTF-8 byte must still participate in
/// keying — `get_str`'s `None` on invalid UTF-8 would otherwise be
/// indistinguishable from the tag being absent, wrongly excluding the
/// message from its bucket.
fn key_for(config: &LinkerConfig, msg: &FixMessage, k: &[u32]) -> Option<String> {
    let mut parts = Vec::with_capacity(k.len());
    for &tag in k {
        let raw = msg.get_latin1(tag)?;
        let normalized = apply_normalizer(config, tag, &raw);
        parts.push(format!("{tag}={normalized}"));
    }
    Some(parts.join("|"))
}

struct Evaluation {
    matched: usize,
    ambiguous: usize,
    // key -> (in indices, out indices)
    buckets: BTreeMap<String, (Vec<usize>, Vec<usize>)>,
}

fn evaluate_combination(
    config: &LinkerConfig,
    in_entries: &[&LogEntry],
    out_entries: &[&LogEntry],
    k: &[u32],
) -> Evaluation {
    let mut buckets: BTreeMap<String, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
    for (i, e) in in_entries.iter().enumerate() {
        if let Some(key) = key_for(config, &e.message, k) {
            buckets.entry(key).or_default().0.push(i);
        }
    }
    for (i, e) in out_entries.iter().enumerate() {
        if let Some(key) = key_for(config, &e.message, k) {
            buckets.entry(key).or_default().1.push(i);
        }
    }

    let mut matched = 0;
    let mut ambiguous = 0;
    for (ins, outs) in buckets.values() {
        if ins.len() == 1 && outs.len() == 1 {
            matched += 1;
        } else if ins.len() > 1 || outs.len() > 1 {
            ambiguous += 1;
        }
    }

    Evaluation {
        matched,
        ambiguous,
        buckets,
    }
}

/// The deterministic linker.
pub struct Linker;

impl Linker {
    /// Discovers per-msgType strategies over `in_entries`/`out_entries`
    /// and emits the full [`LinkReport`].
    pub fn discover(config: &LinkerConfig, in_entries: &[LogEntry], out_entries: &[LogEntry]) -> LinkReport {
        let mut by_type_in: BTreeMap<String, Vec<&LogEntry>> = BTreeMap::new();
        let mut by_type_out: BTreeMap<String, Vec<&LogEntry>> = BTreeMap::new();
        for e in in_entries {
            if let Some(mt) = e.message.msg_type() {
                by_type_in.entry(mt.to_string()).or_default().push(e);
            }
        }
        for e in out_entries {
            if let Some(mt) = e.message.msg_type() {
                by_type_out.entry(mt.to_string()).or_default().push(e);
            }
        }

        let mut msg_types: Vec<String> = by_type_in.keys().chain(by_type_out.keys()).cloned().collect();
        msg_types.sort();
        msg_types.dedup();

        let mut strategies = BTreeMap::new();
        let mut all_links = Vec::new();
        let mut all_collisions = Vec::new();
        let mut total = LinkCounters::default();

        for msg_type in msg_types {
            let empty_in: Vec<&LogEntry> = Vec::new();
            let empty_out: Vec<&LogEntry> = Vec::new();
            let ins = by_type_in.get(&msg_type).unwrap_or(&empty_in);
            let outs = by_type_out.get(&msg_type).unwrap_or(&empty_out);

            let combinations: Vec<Vec<u32>> = match config.override_candidates.get(&msg_type) {
                Some(overrides) => overrides.clone(),
                None => enumerate_combinations(&config.candidate_tags, config.candidate_combination_max_size),
            };

            let mut best: Option<(Vec<u32>, Evaluation)> = None;
            let mut accepted: Option<(Vec<u32>, Evaluation)> = None;

            for combo in combinations {
                let eval = evaluate_combination(config, ins, outs, &combo);
                if eval.buckets.is_empty() {
                    // No message on either side carries every tag in this
                    // combination: it classifies nothing and can't compete
                    // with a combination that actually attempted a match.
                    continue;
                }
                if eval.matched > 0 && eval.ambiguous == 0 {
                    accepted = Some((combo, eval));
                    break;
                }
                let score = eval.matched as isize - eval.ambiguous as isize;
                let better = match &best {
                    None => true,
                    Some((_, best_eval)) => {
                        score > (best_eval.matched as isize - best_eval.ambiguous as isize)
                    }
                };
                if better {
                    best = Some((combo, eval));
                }
            }

            let accepted_cleanly = accepted.is_some();
            let (chosen_tags, eval) = accepted.or(best).unwrap_or_else(|| {
                (Vec::new(), Evaluation { matched: 0, ambiguous: 0, buckets: BTreeMap::new() })
            });
            if accepted_cleanly {
                log::debug!("msgType '{msg_type}': chosen strategy {chosen_tags:?} (matched={}, ambiguous=0)", eval.matched);
            } else {
                log::debug!(
                    "msgType '{msg_type}': no unambiguous strategy found, falling back to best-scoring {chosen_tags:?} (matched={}, ambiguous={})",
                    eval.matched, eval.ambiguous
                );
            }

            let mut unmatched_count = 0;
            for (key, (in_idx, out_idx)) in &eval.buckets {
                if in_idx.len() == 1 && out_idx.len() == 1 {
                    all_links.push(FixLink {
                        msg_type: msg_type.clone(),
                        in_line: ins[in_idx[0]].line_number,
                        out_line: outs[out_idx[0]].line_number,
                        key: key.clone(),
                    });
                } else {
                    // messages sharing an ambiguous key never pair; every
                    // participant on both sides counts as unmatched.
                    unmatched_count += in_idx.len() + out_idx.len();
                }
            }
            // Messages that matched no key at all (missing a candidate tag) are unmatched too.
            let considered_in: usize = eval.buckets.values().map(|(i, _)| i.len()).sum();
            let considered_out: usize = eval.buckets.values().map(|(_, o)| o.len()).sum();
            unmatched_count += ins.len().saturating_sub(considered_in);
            unmatched_count += outs.len().saturating_sub(considered_out);

            let counters = LinkCounters {
                matched: eval.matched,
                unmatched: unmatched_count,
                ambiguous: eval.ambiguous,
            };
            total.matched += counters.matched;
            total.unmatched += counters.unmatched;
            total.ambiguous += counters.ambiguous;

            if eval.ambiguous > 0 {
                let mut offenders: Vec<Collision> = eval
                    .buckets
                    .iter()
                    .filter(|(_, (i, o))| i.len() > 1 || o.len() > 1)
                    .map(|(key, (in_idx, out_idx))| {
                        let mut in_lines: Vec<u64> = in_idx.iter().map(|&i| ins[i].line_number).collect();
                        let mut out_lines: Vec<u64> = out_idx.iter().map(|&i| outs[i].line_number).collect();
                        in_lines.sort_unstable();
                        out_lines.sort_unstable();
                        Collision {
                            msg_type: msg_type.clone(),
                            tags: chosen_tags.clone(),
                            key: key.clone(),
                            in_count: in_idx.len(),
                            out_count: out_idx.len(),
                            in_lines,
                            out_lines,
                        }
                    })
                    .collect();
                offenders.sort_by(|a, b| {
                    let combined_a = a.in_count + a.out_count;
                    let combined_b = b.in_count + b.out_count;
                    combined_b.cmp(&combined_a).then_with(|| a.key.cmp(&b.key))
                });
                offenders.truncate(config.max_collisions);
                all_collisions.extend(offenders);
            }

            strategies.insert(
                msg_type,
                MsgTypeStrategy {
                    tags: chosen_tags,
                    counters,
                },
            );
        }

        all_links.sort_by(|a, b| a.msg_type.cmp(&b.msg_type).then(a.in_line.cmp(&b.in_line)));
        all_collisions.sort_by(|a, b| {
            a.msg_type
                .cmp(&b.msg_type)
                .then_with(|| (b.in_count + b.out_count).cmp(&(a.in_count + a.out_count)))
                .then_with(|| a.key.cmp(&b.key))
        });

        LinkReport {
            strategies,
            links: all_links,
            collisions: all_collisions,
            matched: total.matched,
            unmatched: total.unmatched,
            ambiguous: total.ambiguous,
        }
    }
}

/// Rebuilds a `FxHashMap`-backed index of in-messages by their chosen key
/// for a given msgType strategy. Exposed for callers (the runner) that
/// need to walk linked pairs back to their original `FixMessage` values
/// rather than just line numbers.
pub fn index_by_key<'a>(entries: &'a [LogEntry], config: &LinkerConfig, tags: &[u32]) -> FxHashMap<String, &'a LogEntry> {
    let mut index = FxHashMap::default();
    for e in entries {
        if let Some(key) = key_for(config, &e.message, tags) {
            index.insert(key, e);
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn entry(line: u64, raw: &str) -> LogEntry {
        LogEntry {
            line_number: line,
            message: parse(raw.replace('|', "\x01").as_bytes()),
        }
    }

    #[test]
    fn enumerate_combinations_orders_by_size_then_lex() {
        let combos = enumerate_combinations(&[41, 11, 37], 2);
        assert_eq!(
            combos,
            vec![
                vec![11],
                vec![37],
                vec![41],
                vec![11, 37],
                vec![11, 41],
                vec![37, 41],
            ]
        );
    }

    #[test]
    fn discovers_unique_tag_for_simple_session() {
        // A msgType strategy only ever pairs messages of the SAME type on
        // both sides (the linker groups in/out separately by tag 35 before
        // it ever looks at a candidate key), so a self-consistent fixture
        // needs matching types on both legs.
        let ins = vec![
            entry(1, "8=FIX.4.4|35=D|11=ORD-1|10=001|"),
            entry(2, "8=FIX.4.4|35=D|11=ORD-2|10=002|"),
        ];
        let outs = vec![
            entry(1, "8=FIX.4.4|35=D|11=ORD-1|10=003|"),
            entry(2, "8=FIX.4.4|35=D|11=ORD-2|10=004|"),
        ];
        let report = Linker::discover(&LinkerConfig::default(), &ins, &outs);
        let strategy = &report.strategies["D"];
        assert_eq!(strategy.tags, vec![11]);
        assert_eq!(strategy.counters.matched, 2);
        assert_eq!(strategy.counters.unmatched, 0);
        assert_eq!(strategy.counters.ambiguous, 0);
    }

    #[test]
    fn msg_type_buckets_never_cross_pair() {
        // An in-message of one type and an out-message of another never
        // share a bucket, even if every candidate tag value matches.
        let ins = vec![entry(1, "8=FIX.4.4|35=D|11=ORD-1|10=001|")];
        let outs = vec![entry(1, "8=FIX.4.4|35=8|11=ORD-1|37=EX-1|10=003|")];
        let report = Linker::discover(&LinkerConfig::default(), &ins, &outs);
        assert_eq!(report.strategies["D"].counters.matched, 0);
        assert_eq!(report.strategies["D"].counters.unmatched, 1);
        assert_eq!(report.strategies["8"].counters.matched, 0);
        assert_eq!(report.strategies["8"].counters.unmatched, 1);
    }

    #[test]
    fn non_utf8_correlation_value_still_links() {
        // tag 11 holds a lone 0xE9 byte, invalid as standalone UTF-8. A
        // `get_str`-based key would see the tag as absent on both legs and
        // report them unmatched instead of linked.
        let mut in_msg = FixMessage::new();
        in_msg.push(crate::model::Tag::new(8).unwrap(), b"FIX.4.4".to_vec().into_boxed_slice());
        in_msg.push(crate::model::Tag::new(35).unwrap(), b"D".to_vec().into_boxed_slice());
        in_msg.push(crate::model::Tag::new(11).unwrap(), vec![0xE9].into_boxed_slice());
        let ins = vec![LogEntry { line_number: 1, message: in_msg }];

        let mut out_msg = FixMessage::new();
        out_msg.push(crate::model::Tag::new(8).unwrap(), b"FIX.4.4".to_vec().into_boxed_slice());
        out_msg.push(crate::model::Tag::new(35).unwrap(), b"D".to_vec().into_boxed_slice());
        out_msg.push(crate::model::Tag::new(11).unwrap(), vec![0xE9].into_boxed_slice());
        let outs = vec![LogEntry { line_number: 1, message: out_msg }];

        let report = Linker::discover(&LinkerConfig::default(), &ins, &outs);
        assert_eq!(report.strategies["D"].counters.matched, 1);
        assert_eq!(report.strategies["D"].counters.unmatched, 0);
    }

    #[test]
    fn report_json_is_deterministic_across_runs() {
        let ins = vec![entry(1, "8=FIX.4.4|35=D|11=ORD-1|10=001|")];
        let outs = vec![entry(1, "8=FIX.4.4|35=D|11=ORD-1|10=002|")];
        let config = LinkerConfig::default();
        let first = Linker::discover(&config, &ins, &outs).to_json().expect("json");
        for _ in 0..20 {
            let again = Linker::discover(&config, &ins, &outs).to_json().expect("json");
            assert_eq!(first, again);
        }
    }

    #[test]
    fn ambiguous_bucket_recorded_as_collision() {
        let ins = vec![
            entry(4, "8=FIX.4.4|35=G|41=ORD-2|10=001|"),
            entry(5, "8=FIX.4.4|35=G|41=ORD-2|10=002|"),
        ];
        let outs = vec![entry(9, "8=FIX.4.4|35=G|41=ORD-2|10=003|")];
        let config = LinkerConfig::default();
        let report = Linker::discover(&config, &ins, &outs);
        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].key, "41=ORD-2");
        assert_eq!(report.collisions[0].in_lines, vec![4, 5]);
    }

    #[test]
    fn tag_absent_from_every_message_never_outscores_a_real_attempt() {
        // Every message here carries tag 41 but none carry tag 11 (the
        // first candidate tried). A combination no message carries at all
        // builds an empty bucket map (matched=0, ambiguous=0) which must
        // not be allowed to beat a combination that actually attempted
        // classification and found ambiguity (matched=0, ambiguous=1).
        let ins = vec![
            entry(4, "8=FIX.4.4|35=G|41=ORD-2|10=001|"),
            entry(5, "8=FIX.4.4|35=G|41=ORD-2|10=002|"),
        ];
        let outs = vec![entry(9, "8=FIX.4.4|35=G|41=ORD-2|10=003|")];
        let config = LinkerConfig::default();
        let report = Linker::discover(&config, &ins, &outs);
        let strategy = &report.strategies["G"];
        assert_eq!(strategy.tags, vec![41]);
        assert_eq!(strategy.counters.ambiguous, 1);
    }
}
