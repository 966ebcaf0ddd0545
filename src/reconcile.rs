//! Column reconciliation: map loosely named CSV headers onto the four
//! required survey fields.
//!
//! Matching runs as an ordered ladder of named rules, each awarding a fixed
//! score when it fires. Per field, the best-scoring header wins (earliest
//! header on ties) and an exact normalized match short-circuits. Fields left
//! below [`MIN_SCORE`] get a second, purely conjunctive pass that takes the
//! first qualifying header.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::debug;

use crate::algo::normalize::{contains_any, normalize_name, tokens};

/// Lowest first-pass score that counts as a confident mapping.
pub const MIN_SCORE: f64 = 0.65;

/// One of the four fixed semantic slots a table must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RequiredField {
    #[serde(rename = "movie_genre_top1")]
    MovieGenre,
    #[serde(rename = "series_genre_top1")]
    SeriesGenre,
    #[serde(rename = "ott_top1")]
    Ott,
    #[serde(rename = "content_lang_top1")]
    ContentLanguage,
}

impl RequiredField {
    pub const ALL: [RequiredField; 4] = [
        Self::MovieGenre,
        Self::SeriesGenre,
        Self::Ott,
        Self::ContentLanguage,
    ];

    pub fn canonical_name(self) -> &'static str {
        match self {
            Self::MovieGenre => "movie_genre_top1",
            Self::SeriesGenre => "series_genre_top1",
            Self::Ott => "ott_top1",
            Self::ContentLanguage => "content_lang_top1",
        }
    }
}

impl std::fmt::Display for RequiredField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Keyword bucket a field name falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Movie,
    Series,
    Ott,
    Language,
}

impl Topic {
    /// Classify a normalized name; first bucket that matches wins.
    pub fn classify(normalized: &str) -> Option<Self> {
        if contains_any(normalized, &["movie", "film"]) {
            Some(Self::Movie)
        } else if contains_any(normalized, &["series", "tv"]) {
            Some(Self::Series)
        } else if contains_any(normalized, &["ott", "platform"]) {
            Some(Self::Ott)
        } else if contains_any(normalized, &["lang", "language"]) {
            Some(Self::Language)
        } else {
            None
        }
    }

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Movie => &["movie", "film", "movie genre", "genre"],
            Self::Series => &["series", "show", "tv", "series genre"],
            Self::Ott => &["ott", "platform", "stream", "provider", "service"],
            Self::Language => &["lang", "language", "content lang", "language top"],
        }
    }

    /// Conjunctive test used by the second pass.
    pub fn fallback_matches(self, header: &str) -> bool {
        match self {
            Self::Movie => {
                header.contains("movie") && contains_any(header, &["genre", "gen", "type"])
            }
            Self::Series => contains_any(header, &["series", "show", "tv"]),
            Self::Ott => contains_any(header, &["ott", "platform", "stream", "service"]),
            Self::Language => contains_any(header, &["lang", "language", "tongue"]),
        }
    }
}

/// Tokens that, next to "top", suggest a ranked-preference column.
const TOP_TOPIC_TOKENS: &[&str] = &["movie", "series", "ott", "lang", "language", "platform"];

/// A required field prepared for matching.
#[derive(Debug, Clone)]
pub struct Target {
    pub field: RequiredField,
    pub normalized: String,
    pub topic: Option<Topic>,
}

impl Target {
    pub fn new(field: RequiredField) -> Self {
        let normalized = normalize_name(field.canonical_name());
        let topic = Topic::classify(&normalized);
        Self {
            field,
            normalized,
            topic,
        }
    }
}

/// A named matcher: fires on (target, normalized header) and awards `score`.
#[derive(Clone, Copy)]
pub struct MatchRule {
    pub name: &'static str,
    pub score: f64,
    pub matches: fn(&Target, &str) -> bool,
}

impl std::fmt::Debug for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchRule")
            .field("name", &self.name)
            .field("score", &self.score)
            .finish()
    }
}

fn exact(target: &Target, header: &str) -> bool {
    header == target.normalized
}

fn all_tokens(target: &Target, header: &str) -> bool {
    tokens(&target.normalized)
        .iter()
        .all(|tok| header.contains(tok))
}

fn topic_keyword(target: &Target, header: &str) -> bool {
    target
        .topic
        .is_some_and(|topic| contains_any(header, topic.keywords()))
}

fn top_topic(_target: &Target, header: &str) -> bool {
    header.contains("top") && contains_any(header, TOP_TOPIC_TOKENS)
}

/// First-pass rules, strongest first.
pub const RULES: &[MatchRule] = &[
    MatchRule {
        name: "exact",
        score: 1.0,
        matches: exact,
    },
    MatchRule {
        name: "all_tokens",
        score: 0.9,
        matches: all_tokens,
    },
    MatchRule {
        name: "topic_keyword",
        score: 0.7,
        matches: topic_keyword,
    },
    MatchRule {
        name: "top_topic",
        score: 0.65,
        matches: top_topic,
    },
];

/// Header chosen for a field and how it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedColumn {
    pub column: String,
    pub rule: &'static str,
    /// First-pass score; `None` for second-pass matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Total mapping from every required field to one header.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Mapping {
    columns: BTreeMap<RequiredField, MatchedColumn>,
}

impl Mapping {
    pub fn column(&self, field: RequiredField) -> &str {
        // Construction guarantees every field is present.
        self.columns
            .get(&field)
            .map(|m| m.column.as_str())
            .unwrap_or_default()
    }

    pub fn matched(&self, field: RequiredField) -> Option<&MatchedColumn> {
        self.columns.get(&field)
    }

    /// Mapped header names in required-field order.
    pub fn columns(&self) -> Vec<&str> {
        RequiredField::ALL.iter().map(|&f| self.column(f)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RequiredField, &MatchedColumn)> {
        self.columns.iter().map(|(f, m)| (*f, m))
    }
}

/// Reconciliation failed for at least one field.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}", self.diagnostic())]
pub struct ReconciliationError {
    pub available: Vec<String>,
    pub mapped: Vec<(RequiredField, String)>,
    pub unmapped: Vec<RequiredField>,
    /// Nearest header by name similarity, per unmapped field.
    pub closest: Vec<(RequiredField, Option<(String, f64)>)>,
}

impl ReconciliationError {
    /// Multi-line text for the uploader.
    pub fn diagnostic(&self) -> String {
        let mut msg = String::from(
            "Missing required columns or ambiguous names. \
             I tried to map automatically but failed for some fields.\n",
        );
        let _ = writeln!(msg, "Available columns in CSV: {}", self.available.join(", "));
        msg.push_str("Automatic mapping results so far:\n");
        for (field, column) in &self.mapped {
            let _ = writeln!(msg, "  {field}  ->  {column}");
        }
        msg.push_str("Fields needing attention (not confidently mapped):\n");
        for field in &self.unmapped {
            let hint = self
                .closest
                .iter()
                .find(|(f, _)| f == field)
                .and_then(|(_, c)| c.as_ref());
            match hint {
                Some((column, sim)) => {
                    let _ = writeln!(msg, "  {field}  (closest header: '{column}', similarity {sim:.2})");
                }
                None => {
                    let _ = writeln!(msg, "  {field}");
                }
            }
        }
        msg.push_str(
            "If your file uses different names, either rename CSV column(s) or add a header mapping.",
        );
        msg
    }
}

/// Best first-pass header for one target.
pub fn best_match(target: &Target, headers: &[String]) -> Option<MatchedColumn> {
    let mut best: Option<(usize, f64, &'static str)> = None;
    for (idx, header) in headers.iter().enumerate() {
        let normalized = normalize_name(header);
        for rule in RULES {
            if !(rule.matches)(target, &normalized) {
                continue;
            }
            if rule.score >= 1.0 {
                return Some(MatchedColumn {
                    column: header.clone(),
                    rule: rule.name,
                    score: Some(rule.score),
                });
            }
            if best.map_or(true, |(_, score, _)| rule.score > score) {
                best = Some((idx, rule.score, rule.name));
            }
        }
    }
    best.map(|(idx, score, rule)| MatchedColumn {
        column: headers[idx].clone(),
        rule,
        score: Some(score),
    })
}

/// Second pass: first header satisfying the target's conjunctive rule.
pub fn fallback_match(target: &Target, headers: &[String]) -> Option<MatchedColumn> {
    let topic = target.topic?;
    headers
        .iter()
        .find(|h| topic.fallback_matches(&normalize_name(h)))
        .map(|h| MatchedColumn {
            column: h.clone(),
            rule: "fallback",
            score: None,
        })
}

fn closest_header(target: &Target, headers: &[String]) -> Option<(String, f64)> {
    let mut best: Option<(String, f64)> = None;
    for header in headers {
        let sim = jaro_winkler(&target.normalized, &normalize_name(header));
        if best.as_ref().map_or(true, |(_, s)| sim > *s) {
            best = Some((header.clone(), sim));
        }
    }
    best
}

/// Map every required field onto one of `headers`, or explain why not.
///
/// Headers stay in the pool after use, so one header may serve two fields.
pub fn reconcile(headers: &[String]) -> Result<Mapping, ReconciliationError> {
    let targets: Vec<Target> = RequiredField::ALL.iter().map(|&f| Target::new(f)).collect();
    let mut columns: BTreeMap<RequiredField, MatchedColumn> = BTreeMap::new();

    for target in &targets {
        match best_match(target, headers) {
            Some(m) if m.score.unwrap_or(0.0) >= MIN_SCORE => {
                debug!(field = %target.field, column = %m.column, rule = m.rule, "mapped");
                columns.insert(target.field, m);
            }
            _ => {}
        }
    }

    for target in &targets {
        if columns.contains_key(&target.field) {
            continue;
        }
        if let Some(m) = fallback_match(target, headers) {
            debug!(field = %target.field, column = %m.column, "mapped by fallback");
            columns.insert(target.field, m);
        }
    }

    let unmapped: Vec<RequiredField> = RequiredField::ALL
        .iter()
        .copied()
        .filter(|f| !columns.contains_key(f))
        .collect();

    if unmapped.is_empty() {
        return Ok(Mapping { columns });
    }

    let closest = targets
        .iter()
        .filter(|t| unmapped.contains(&t.field))
        .map(|t| (t.field, closest_header(t, headers)))
        .collect();

    Err(ReconciliationError {
        available: headers.to_vec(),
        mapped: columns
            .iter()
            .map(|(f, m)| (*f, m.column.clone()))
            .collect(),
        unmapped,
        closest,
    })
}
