//! Heuristic extraction of a remediation proposal from free-text model
//! output. Best-effort by design: the extractor never fails, it only
//! degrades to defaults.

use once_cell::sync::Lazy;
use regex::Regex;

/// Structured summary of a suggested remediation, shown to the user for an
/// approve/reject/edit decision.
#[derive(Debug, Clone, PartialEq)]
pub struct HitlProposal {
    pub column: String,
    pub strategy: String,
    pub fill_value: String,
    pub missing_count: u64,
    pub missing_percent: f64,
}

/// Decides whether free-text analysis output requires a human decision.
///
/// Returning `None` means the pipeline may proceed unattended. The default
/// implementation is keyword/regex based and inherently fuzzy; it sits
/// behind this trait so it can be replaced without touching the state
/// machine.
pub trait ProposalExtractor: Send + Sync {
    fn analyze(&self, answer: &str) -> Option<HitlProposal>;
}

/// Keyword gate plus regex field extraction over the analysis answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordExtractor;

const REMEDIATION_KEYWORDS: &[&str] = &[
    "missing value",
    "null",
    "nan",
    "impute",
    "imputation",
    "preprocessing",
    "empty cell",
    "결측",
    "누락",
    "전처리",
];

static COLUMN_BEFORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)['"](\w+)['"]\s*(?:column|컬럼)"#).expect("column pattern"));
static COLUMN_AFTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)column\s*['"](\w+)['"]"#).expect("column pattern"));
static MISSING_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*(?:missing|null|결측|누락)").expect("count pattern"));
static PERCENTAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("percent pattern"));
static STRATEGY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)mode|median|mean|최빈값|중앙값|평균").expect("strategy pattern"));

impl ProposalExtractor for KeywordExtractor {
    fn analyze(&self, answer: &str) -> Option<HitlProposal> {
        let lower = answer.to_lowercase();
        if !REMEDIATION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            return None;
        }
        Some(extract_proposal(answer))
    }
}

/// Pattern-match a proposal out of the answer text. Unresolved fields fall
/// back to well-formed defaults; this function is total.
pub fn extract_proposal(answer: &str) -> HitlProposal {
    let column = COLUMN_BEFORE
        .captures(answer)
        .or_else(|| COLUMN_AFTER.captures(answer))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let missing_count = MISSING_COUNT
        .captures(answer)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(0);

    let missing_percent = PERCENTAGE
        .captures(answer)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);

    let strategy = STRATEGY
        .find(answer)
        .map(|m| canonical_strategy(m.as_str()))
        .unwrap_or_else(|| "mode".to_string());

    HitlProposal {
        column,
        strategy,
        fill_value: "auto".to_string(),
        missing_count,
        missing_percent,
    }
}

fn canonical_strategy(raw: &str) -> String {
    match raw {
        "최빈값" => "mode".to_string(),
        "중앙값" => "median".to_string(),
        "평균" => "mean".to_string(),
        other => other.to_lowercase(),
    }
}
