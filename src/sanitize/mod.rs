//! Prompt sanitization ahead of provider dispatch.
//!
//! Upstream video services reject prompts that look like deepfake requests or
//! describe violence, often with an opaque error. [`Sanitizer::clean`] rewrites
//! the prompt with a literal, auditable table so those rejections happen less
//! often:
//!
//! - identity/fidelity-preservation phrases are deleted,
//! - violence, weapon and graphic terms are replaced with softer words,
//! - whitespace and duplicated punctuation left behind are normalized.
//!
//! The pass is pure and total: it never fails and never rejects a prompt, even
//! when nothing is left of it.
//!
//! ```
//! use vidgen::Sanitizer;
//!
//! let sanitizer = Sanitizer::default();
//! let cleaned = sanitizer.clean("Um lobo ameaçador, preservando 100% da identidade facial.");
//! assert_eq!(cleaned.text, "Um lobo impressionante.");
//! assert!(cleaned.altered);
//! ```

mod rules;

pub use rules::{IDENTITY_PHRASES, RULESET_VERSION, SOFTENING_TABLE};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Upper bound on rewrite passes. Every built-in rule reaches its fixpoint in
/// two; the cap only matters for custom tables.
const MAX_PASSES: usize = 8;

static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());
static PUNCT_RUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[,;:.!?](?:\s*[,;:.!?])+").ok());
static SPACE_BEFORE_PUNCT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s+([,;:.!?])").ok());

/// A term and the word that replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    /// Deny-listed stem, matched at the start of a word.
    pub term: String,
    /// Softer wording inserted in its place.
    pub replacement: String,
}

/// Versioned moderation tables.
///
/// The built-in tables are returned by [`SanitizerRules::default`]; a deployment
/// can ship its own as JSON and load it with `serde_json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerRules {
    /// Version tag, logged when the sanitizer is built.
    pub version: String,
    /// Phrases removed outright.
    pub identity_phrases: Vec<String>,
    /// Terms replaced with softer wording.
    pub substitutions: Vec<Substitution>,
}

impl Default for SanitizerRules {
    fn default() -> Self {
        Self {
            version: RULESET_VERSION.to_string(),
            identity_phrases: IDENTITY_PHRASES.iter().map(|p| p.to_string()).collect(),
            substitutions: SOFTENING_TABLE
                .iter()
                .map(|(term, replacement)| Substitution {
                    term: term.to_string(),
                    replacement: replacement.to_string(),
                })
                .collect(),
        }
    }
}

/// Result of a sanitization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanitizedPrompt {
    /// The rewritten prompt.
    pub text: String,
    /// Whether any rule changed the prompt (normalization alone does not count).
    pub altered: bool,
    /// Number of identity phrases deleted.
    pub removed_phrases: usize,
    /// Number of terms replaced.
    pub softened_terms: usize,
}

#[derive(Debug)]
struct CompiledRule {
    pattern: Regex,
    replacement: String,
}

/// Compiled sanitizer. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct Sanitizer {
    version: String,
    deletions: Vec<CompiledRule>,
    substitutions: Vec<CompiledRule>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        let rules = SanitizerRules::default();
        let version = rules.version.clone();
        let (deletions, substitutions) = Self::compile_all(rules, |term, err| {
            tracing::warn!(term, error = %err, "skipping sanitizer rule that failed to compile");
            None
        });
        Self {
            version,
            deletions,
            substitutions,
        }
    }
}

impl Sanitizer {
    /// Compiles a custom rule table.
    ///
    /// Fails if any entry does not compile into a pattern, which can only happen
    /// for pathologically long entries.
    pub fn new(rules: SanitizerRules) -> Result<Self, regex::Error> {
        let version = rules.version.clone();
        let mut first_error = None;
        let (deletions, substitutions) = Self::compile_all(rules, |_, err| {
            first_error.get_or_insert(err);
            None
        });
        if let Some(err) = first_error {
            return Err(err);
        }
        tracing::debug!(version = %version, "compiled sanitizer rules");
        Ok(Self {
            version,
            deletions,
            substitutions,
        })
    }

    /// Version tag of the rule table in use.
    pub fn version(&self) -> &str {
        &self.version
    }

    fn compile_all(
        rules: SanitizerRules,
        mut on_error: impl FnMut(&str, regex::Error) -> Option<CompiledRule>,
    ) -> (Vec<CompiledRule>, Vec<CompiledRule>) {
        let mut phrases: Vec<(String, String)> = rules
            .identity_phrases
            .into_iter()
            .map(|p| (p, String::new()))
            .collect();
        let mut terms: Vec<(String, String)> = rules
            .substitutions
            .into_iter()
            .map(|s| (s.term, s.replacement))
            .collect();

        // Longest first, so "violento" wins over "violent".
        for table in [&mut phrases, &mut terms] {
            table.retain(|(term, _)| !term.trim().is_empty());
            table.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()).then(a.0.cmp(&b.0)));
        }

        let mut compile = |entries: Vec<(String, String)>| -> Vec<CompiledRule> {
            entries
                .into_iter()
                .filter_map(|(term, replacement)| match Regex::new(&word_pattern(&term)) {
                    Ok(pattern) => Some(CompiledRule {
                        pattern,
                        replacement,
                    }),
                    Err(err) => on_error(term.as_str(), err),
                })
                .collect()
        };

        let deletions = compile(phrases);
        let substitutions = compile(terms);
        (deletions, substitutions)
    }

    /// Rewrites a prompt. Pure: the same input always yields the same output.
    pub fn clean(&self, prompt: &str) -> SanitizedPrompt {
        let mut text = normalize(prompt);
        let mut removed_phrases = 0;
        let mut softened_terms = 0;

        for _ in 0..MAX_PASSES {
            let mut next = text.clone();

            for rule in &self.deletions {
                let hits = rule.pattern.find_iter(&next).count();
                if hits > 0 {
                    removed_phrases += hits;
                    next = rule.pattern.replace_all(&next, "").into_owned();
                }
            }
            for rule in &self.substitutions {
                let hits = rule.pattern.find_iter(&next).count();
                if hits > 0 {
                    softened_terms += hits;
                    next = rule
                        .pattern
                        .replace_all(&next, regex::NoExpand(rule.replacement.as_str()))
                        .into_owned();
                }
            }

            let next = normalize(&next);
            if next == text {
                break;
            }
            text = next;
        }

        SanitizedPrompt {
            text,
            altered: removed_phrases + softened_terms > 0,
            removed_phrases,
            softened_terms,
        }
    }
}

/// Case-insensitive, whitespace-flexible pattern for a literal entry, anchored
/// at the start of a word and swallowing the rest of the last word.
fn word_pattern(term: &str) -> String {
    let body = term
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let lead = if term.trim_start().starts_with(|c: char| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };
    format!(r"(?i){lead}{body}\w*")
}

/// Collapses whitespace, drops duplicated punctuation and trims dangling
/// separators from both ends.
fn normalize(text: &str) -> String {
    let mut out = text.to_string();
    if let Some(re) = WHITESPACE.as_ref() {
        out = re.replace_all(&out, " ").into_owned();
    }
    if let Some(re) = PUNCT_RUN.as_ref() {
        // A run keeps its sentence terminator if it has one, else its first mark.
        out = re
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                let run = &caps[0];
                run.chars()
                    .find(|c| matches!(c, '.' | '!' | '?'))
                    .or_else(|| run.chars().find(|c| !c.is_whitespace()))
                    .map(String::from)
                    .unwrap_or_default()
            })
            .into_owned();
    }
    if let Some(re) = SPACE_BEFORE_PUNCT.as_ref() {
        out = re.replace_all(&out, "$1").into_owned();
    }
    out.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '.' | '!' | '?'))
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_deny_terms() -> Vec<&'static str> {
        IDENTITY_PHRASES
            .iter()
            .copied()
            .chain(SOFTENING_TABLE.iter().map(|(term, _)| *term))
            .collect()
    }

    fn contains_ci(haystack: &str, needle: &str) -> bool {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }

    #[test]
    fn test_softens_violent_terms() {
        let s = Sanitizer::default();
        let out = s.clean("ameaçador e violento ataque");
        assert_eq!(out.text, "impressionante e intenso movimento");
        assert!(out.altered);
        assert_eq!(out.softened_terms, 3);
        assert_eq!(out.removed_phrases, 0);
    }

    #[test]
    fn test_removes_identity_phrases() {
        let s = Sanitizer::default();
        let out = s.clean(
            "Retrato de uma senhora sorrindo, preservando 100% da identidade facial original, luz suave.",
        );
        assert_eq!(out.text, "Retrato de uma senhora sorrindo, luz suave.");
        assert_eq!(out.removed_phrases, 1);
    }

    #[test]
    fn test_english_terms() {
        let s = Sanitizer::default();
        let out = s.clean("A threatening dragon with BLOOD on its claws. Maintain facial identity!");
        assert_eq!(out.text, "A impressive dragon with dramatic visual effect on its claws.");
    }

    #[test]
    fn test_inflected_forms_are_covered() {
        let s = Sanitizer::default();
        let out = s.clean("Uma expressão ameaçadora e cenas violentas");
        assert_eq!(out.text, "Uma expressão impressionante e cenas intensa");
        assert!(!contains_ci(&out.text, "ameaç"));
    }

    #[test]
    fn test_deny_list_completeness() {
        let s = Sanitizer::default();
        for term in all_deny_terms() {
            for input in [
                format!("Um cachorro correndo na praia {term} ao pôr do sol."),
                format!("{} no início da frase, e depois calma.", term.to_uppercase()),
                format!("Cena final:{term}"),
            ] {
                let out = s.clean(&input);
                for denied in all_deny_terms() {
                    assert!(
                        !contains_ci(&out.text, denied),
                        "{denied:?} survived in {:?} (input {input:?})",
                        out.text
                    );
                }
            }
        }
    }

    #[test]
    fn test_replacements_are_clean() {
        for (_, replacement) in SOFTENING_TABLE {
            for denied in all_deny_terms() {
                assert!(
                    !contains_ci(replacement, denied),
                    "replacement {replacement:?} contains {denied:?}"
                );
            }
        }
    }

    #[test]
    fn test_idempotence() {
        let s = Sanitizer::default();
        let inputs = [
            "ameaçador e violento ataque",
            "  Um gato ,, olhando  pela janela ..  ",
            "Preservar 100% da identidade facial; manter identidade. Sangue!",
            "A violent attack with a weapon, terror and blood",
            "",
            "!!!",
            "Menina sorrindo, alta fidelidade, identidade facial, 100% fiel",
        ];
        for input in inputs {
            let once = s.clean(input);
            let twice = s.clean(&once.text);
            assert_eq!(once.text, twice.text, "not idempotent for {input:?}");
            assert!(!twice.altered);
        }
    }

    #[test]
    fn test_preserves_unrelated_content() {
        let s = Sanitizer::default();
        let prompt = "Um gato laranja olhando pela janela, luz suave do fim de tarde.";
        let out = s.clean(prompt);
        assert_eq!(out.text, prompt);
        assert!(!out.altered);

        let out = s.clean("  Um gato laranja\n\tolhando pela   janela  ");
        assert_eq!(out.text, "Um gato laranja olhando pela janela");
        assert!(!out.altered);
    }

    #[test]
    fn test_does_not_touch_words_containing_terms() {
        let s = Sanitizer::default();
        let prompt = "Um armário antigo perto da fazenda, estilo desarmado";
        assert_eq!(s.clean(prompt).text, prompt);
    }

    #[test]
    fn test_prefixed_terms_pass_through() {
        let s = Sanitizer::default();
        let out = s.clean("Um gato superviolento e um dançarino skilled");
        assert_eq!(out.text, "Um gato superviolento e um dançarino skilled");
        assert!(!out.altered);

        let out = s.clean("Um gato super-violento");
        assert_eq!(out.text, "Um gato super-intenso");
    }

    #[test]
    fn test_fully_neutralized_prompt_is_returned() {
        let s = Sanitizer::default();
        let out = s.clean("Manter identidade facial, 100% fiel.");
        assert_eq!(out.text, "");
        assert!(out.altered);
    }

    #[test]
    fn test_normalize_punctuation() {
        assert_eq!(normalize("a , , b"), "a, b");
        assert_eq!(normalize("fim .. !"), "fim.");
        assert_eq!(normalize(", começo"), "começo");
        assert_eq!(normalize("fim,  "), "fim");
    }

    #[test]
    fn test_custom_rules() {
        let rules = SanitizerRules {
            version: "test".into(),
            identity_phrases: vec!["same face".into()],
            substitutions: vec![Substitution {
                term: "explosion".into(),
                replacement: "burst of light".into(),
            }],
        };
        let s = Sanitizer::new(rules).unwrap();
        assert_eq!(s.version(), "test");
        assert_eq!(
            s.clean("An explosion, same face").text,
            "An burst of light"
        );
    }

    #[test]
    fn test_rules_roundtrip_through_json() {
        let rules = SanitizerRules::default();
        let json = serde_json::to_string(&rules).unwrap();
        let back: SanitizerRules = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rules);
        assert_eq!(back.version, RULESET_VERSION);
    }
}
