//! Per-tag value normalizers used by the linker and comparator.
//!
//! Expressed as a tagged variant rather than trait objects or reflective
//! lookup: §9 of the design notes calls out "reflective per-tag normalizer
//! objects" as a pattern to replace with a plain compiled value.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A serializable description of a [`Normalizer`], as it appears in a
/// scenario config file. Compiled once per run via [`NormalizerSpec::compile`]
/// so the hot linking/comparing path never touches serde or re-parses a
/// regex pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NormalizerSpec {
    /// See [`Normalizer::Trim`].
    Trim,
    /// See [`Normalizer::RegexReplace`].
    RegexReplace {
        /// Search pattern, compiled on [`compile`](NormalizerSpec::compile).
        pattern: String,
        /// Replacement text.
        replacement: String,
    },
    /// See [`Normalizer::Compose`].
    Compose(Vec<NormalizerSpec>),
}

impl NormalizerSpec {
    /// Compiles this spec into a runnable [`Normalizer`], failing if any
    /// `RegexReplace` pattern does not compile.
    pub fn compile(&self) -> Result<Normalizer, regex::Error> {
        Ok(match self {
            NormalizerSpec::Trim => Normalizer::Trim,
            NormalizerSpec::RegexReplace { pattern, replacement } => {
                Normalizer::regex_replace(pattern, replacement.clone())?
            }
            NormalizerSpec::Compose(steps) => {
                let compiled: Result<Vec<_>, _> = steps.iter().map(NormalizerSpec::compile).collect();
                Normalizer::Compose(compiled?)
            }
        })
    }
}

/// A single normalization step, or a composition of several applied
/// left-to-right.
#[derive(Debug, Clone)]
pub enum Normalizer {
    /// Removes leading and trailing ASCII whitespace.
    Trim,
    /// Replaces the first match of `pattern` with `replacement`.
    RegexReplace {
        /// Compiled search pattern.
        pattern: Regex,
        /// Replacement text (may use capture-group references).
        replacement: String,
    },
    /// Applies each normalizer in order, feeding each result into the next.
    Compose(Vec<Normalizer>),
}

impl Normalizer {
    /// Builds a `RegexReplace` step, compiling `pattern` once.
    pub fn regex_replace(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Normalizer::RegexReplace {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }

    /// Applies this normalizer to `value`, returning the transformed text.
    pub fn apply(&self, value: &str) -> String {
        match self {
            Normalizer::Trim => value.trim().to_string(),
            Normalizer::RegexReplace { pattern, replacement } => {
                pattern.replace(value, replacement.as_str()).into_owned()
            }
            Normalizer::Compose(steps) => {
                let mut current = value.to_string();
                for step in steps {
                    current = step.apply(&current);
                }
                current
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_removes_surrounding_whitespace() {
        assert_eq!(Normalizer::Trim.apply("  MSFT  "), "MSFT");
    }

    #[test]
    fn regex_replace_substitutes_pattern() {
        let n = Normalizer::regex_replace(r"^ORD-", "O-").expect("valid regex");
        assert_eq!(n.apply("ORD-1"), "O-1");
    }

    #[test]
    fn compose_applies_in_order() {
        let n = Normalizer::Compose(vec![
            Normalizer::Trim,
            Normalizer::regex_replace(r"\s+", "_").expect("valid regex"),
        ]);
        assert_eq!(n.apply("  a  b  "), "a_b");
    }

    #[test]
    fn spec_compiles_and_roundtrips_through_json() {
        let spec = NormalizerSpec::Compose(vec![
            NormalizerSpec::Trim,
            NormalizerSpec::RegexReplace {
                pattern: r"^ORD-".to_string(),
                replacement: "O-".to_string(),
            },
        ]);
        let json = serde_json::to_string(&spec).expect("serialize");
        let back: NormalizerSpec = serde_json::from_str(&json).expect("deserialize");
        let normalizer = back.compile().expect("compiles");
        assert_eq!(normalizer.apply("  ORD-7  "), "O-7");
    }
}
