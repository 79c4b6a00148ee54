//! Built-in moderation tables.
//!
//! Entries are literal, lower-case text. Matching is case-insensitive, starts
//! at a word boundary and swallows the rest of the word, so inflected forms
//! ("ameaçadora", "attacks") are covered by their stem. A term embedded after
//! a prefix is left alone: "superviolento", "skilled" and "desarmado" pass
//! through unchanged. Replacements must never contain any deny-listed term.

/// Version tag of the built-in tables. Bump whenever an entry changes.
pub const RULESET_VERSION: &str = "2025.03";

/// Phrases asking the model to preserve a real person's identity.
///
/// Deleted outright: downstream deepfake detection rejects them even when the
/// subject is a drawing or a toy.
pub const IDENTITY_PHRASES: &[&str] = &[
    // Portuguese
    "com expressões faciais que devem ser preservadas exatamente como na foto original",
    "expressões faciais que devem ser preservadas exatamente como na foto original",
    "expressões faciais que devem ser preservadas",
    "expressões faciais devem ser preservadas",
    "preservando 100% da identidade facial original",
    "preservando 100% da identidade facial",
    "preservar 100% da identidade facial",
    "mantendo alta fidelidade das características faciais",
    "alta fidelidade das características faciais",
    "preservar as características originais",
    "preservar características originais",
    "mantendo a identidade facial",
    "manter a identidade facial",
    "manter identidade facial",
    "manter identidade",
    "identidade facial original",
    "identidade facial",
    "fidelidade facial",
    "alta fidelidade",
    "100% de fidelidade",
    "100% fiel",
    "características originais",
    "exatamente como na foto original",
    "idêntico à foto original",
    "idêntica à foto original",
    "não devem ser alterados",
    "não devem ser alteradas",
    "não deve ser alterado",
    "não deve ser alterada",
    "não pode ser alterado",
    "não pode ser alterada",
    // English
    "maintaining the facial identity",
    "maintaining facial identity",
    "maintain the facial identity",
    "maintain facial identity",
    "preserving facial identity",
    "preserve facial identity",
    "preserve the original facial features",
    "keep the original facial features",
    "identical to the original photo",
    "exactly as in the original photo",
    "high fidelity to the original",
    "100% fidelity",
    "facial identity",
    "must not be altered",
    "must not be changed",
];

/// Violence, weapon and graphic terms with their softer substitutes.
pub const SOFTENING_TABLE: &[(&str, &str)] = &[
    // Portuguese
    ("ameaçador", "impressionante"),
    ("ameaça", "presença marcante"),
    ("violento", "intenso"),
    ("violenta", "intensa"),
    ("violência", "intensidade"),
    ("agressivo", "enérgico"),
    ("agressiva", "enérgica"),
    ("atacando", "avançando"),
    ("atacar", "avançar"),
    ("ataque", "movimento"),
    ("ataca", "avança"),
    ("sangrento", "dramático"),
    ("sangrenta", "dramática"),
    ("sangue", "efeito visual dramático"),
    ("armas", "objetos"),
    ("arma", "objeto"),
    ("aterrorizante", "surpreendente"),
    ("terror", "suspense"),
    ("pânico", "agitação"),
    ("afiado", "marcante"),
    ("afiada", "marcante"),
    ("assustador", "intrigante"),
    ("matar", "derrotar"),
    ("morte", "fim"),
    // English
    ("threatening", "impressive"),
    ("threat", "presence"),
    ("violent", "intense"),
    ("violence", "intensity"),
    ("aggressive", "energetic"),
    ("attack", "approach"),
    ("blood", "dramatic visual effect"),
    ("weapon", "object"),
    ("gun", "prop"),
    ("knife", "tool"),
    ("terrifying", "striking"),
    ("kill", "defeat"),
    ("gore", "drama"),
];
