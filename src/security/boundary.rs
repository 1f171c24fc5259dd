use crate::config::BoundaryConfig;
use crate::store::ApprovalPatternStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard safety check that fired for a request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BoundaryKind {
    FinancialThreshold,
    LegalLanguage,
    Irreversible,
    Novel,
    LowConfidence,
}

/// Ephemeral result of a boundary check. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    #[serde(rename = "type")]
    pub kind: BoundaryKind,
    pub detail: String,
}

impl Boundary {
    fn new(kind: BoundaryKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// What the enforcer needs to know about a side-effecting request.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryRequest<'a> {
    pub action: &'a str,
    pub sub_type: &'a str,
    pub payload: &'a Value,
    /// Model-supplied confidence, when the model gave one.
    pub confidence: Option<f64>,
}

/// Payload keys whose text is scanned for legal language.
const TEXT_KEYS: &[&str] = &["subject", "body"];
const AMOUNT_KEY: &str = "amount";

/// Evaluates the five hard boundaries independently of the autonomy tier.
///
/// Boundaries can only escalate: a non-empty result forces approval, an empty
/// one never relaxes a decision the tier already made.
#[derive(Debug, Clone)]
pub struct BoundaryEnforcer {
    config: BoundaryConfig,
    legal_terms: Vec<String>,
    patterns: ApprovalPatternStore,
}

impl BoundaryEnforcer {
    pub fn new(config: BoundaryConfig, patterns: ApprovalPatternStore) -> Self {
        let legal_terms = config
            .legal_terms
            .iter()
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect();
        Self {
            config,
            legal_terms,
            patterns,
        }
    }

    /// Run every check and return all that fired.
    pub async fn check_boundaries(&self, request: &BoundaryRequest<'_>) -> Vec<Boundary> {
        let mut boundaries = Vec::new();

        if let Some(amount) = max_amount(request.payload)
            && amount > self.config.financial_threshold
        {
            boundaries.push(Boundary::new(
                BoundaryKind::FinancialThreshold,
                format!(
                    "amount {amount} exceeds threshold {}",
                    self.config.financial_threshold
                ),
            ));
        }

        let mut texts = Vec::new();
        collect_text_fields(request.payload, &mut texts);
        let matched: Vec<&str> = self
            .legal_terms
            .iter()
            .filter(|term| texts.iter().any(|text| contains_term(text, term)))
            .map(String::as_str)
            .collect();
        if !matched.is_empty() {
            boundaries.push(Boundary::new(
                BoundaryKind::LegalLanguage,
                format!("legal terms present: {}", matched.join(", ")),
            ));
        }

        if self
            .config
            .irreversible_actions
            .iter()
            .any(|action| action == request.action)
        {
            boundaries.push(Boundary::new(
                BoundaryKind::Irreversible,
                format!("{} cannot be undone", request.action),
            ));
        }

        if self.is_novel(request.action, request.sub_type).await {
            boundaries.push(Boundary::new(
                BoundaryKind::Novel,
                format!(
                    "no recorded history for {} ({})",
                    request.action, request.sub_type
                ),
            ));
        }

        if let Some(confidence) = request.confidence
            && (confidence.is_nan() || confidence < self.config.confidence_threshold)
        {
            boundaries.push(Boundary::new(
                BoundaryKind::LowConfidence,
                format!(
                    "confidence {confidence} below threshold {}",
                    self.config.confidence_threshold
                ),
            ));
        }

        boundaries
    }

    pub fn should_escalate(boundaries: &[Boundary]) -> bool {
        !boundaries.is_empty()
    }

    /// A failed lookup counts as novel so the request still reaches a human.
    async fn is_novel(&self, action: &str, sub_type: &str) -> bool {
        match self.patterns.is_novel(action, sub_type).await {
            Ok(novel) => novel,
            Err(error) => {
                tracing::warn!(action, sub_type, %error, "approval pattern lookup failed; treating as novel");
                true
            }
        }
    }
}

/// Largest `amount` anywhere in the payload, as a number or numeric string.
///
/// A value that parses but is not finite (`inf`, `1e999`, `NaN`) counts as
/// infinite so it always exceeds the threshold.
fn max_amount(value: &Value) -> Option<f64> {
    let mut found: Option<f64> = None;
    let mut consider = |amount: f64| {
        let amount = if amount.is_finite() { amount } else { f64::INFINITY };
        found = Some(found.map_or(amount, |current| current.max(amount)));
    };

    let mut stack = vec![value];
    while let Some(current) = stack.pop() {
        match current {
            Value::Object(map) => {
                for (key, child) in map {
                    if key.eq_ignore_ascii_case(AMOUNT_KEY) {
                        match child {
                            Value::Number(n) => {
                                if let Some(amount) = n.as_f64() {
                                    consider(amount);
                                }
                            }
                            Value::String(s) => {
                                if let Ok(amount) = s.trim().parse::<f64>() {
                                    consider(amount);
                                }
                            }
                            _ => {}
                        }
                    }
                    stack.push(child);
                }
            }
            Value::Array(items) => stack.extend(items),
            _ => {}
        }
    }
    found
}

/// Strings under `subject`/`body` keys, at any depth.
fn collect_text_fields<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if TEXT_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k)) {
                    collect_strings(child, out);
                }
                collect_text_fields(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text_fields(item, out);
            }
        }
        _ => {}
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

/// Inflections a term may carry and still match ("contracts", "NDAs", "signed").
const TERM_SUFFIXES: &[&str] = &["", "s", "es", "ed", "d", "'s"];

/// Case-insensitive match of `term` (already lowercase) starting on a word
/// boundary and ending on one, allowing a plural or past-tense suffix.
fn contains_term(text: &str, term: &str) -> bool {
    let haystack = text.to_lowercase();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(term) {
        let begin = start + pos;
        let end = begin + term.len();
        let before_ok = haystack[..begin]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let rest = &haystack[end..];
        let after_ok = TERM_SUFFIXES.iter().any(|suffix| {
            rest.strip_prefix(suffix).is_some_and(|tail| {
                tail.chars().next().is_none_or(|c| !c.is_alphanumeric())
            })
        });
        if before_ok && after_ok {
            return true;
        }
        start = begin + haystack[begin..].chars().next().map_or(1, char::len_utf8);
    }
    false
}
