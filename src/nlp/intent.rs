//! Intent classifier (spec §4.8): a deterministic keyword/regex ruleset,
//! swappable for a model behind the same interface without the pipeline
//! observing the substitution (spec §9 design note).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::catalog::model::{Catalog, DimensionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    MetricQuery,
    TrendAnalysis,
    Comparison,
    CohortAnalysis,
    TopN,
    Filtering,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetricQuery => "metric_query",
            Self::TrendAnalysis => "trend_analysis",
            Self::Comparison => "comparison",
            Self::CohortAnalysis => "cohort_analysis",
            Self::TopN => "top_n",
            Self::Filtering => "filtering",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Understanding {
    pub intent: Intent,
    /// The pattern-matched intent before the confidence gate (spec §4.8)
    /// clamps it to `Unknown`. Short pronoun-like follow-ups ("now show the
    /// trend") legitimately score below the 0.5 threshold on length alone;
    /// the orchestrator consults this field to still honor them when the
    /// session has recency context to merge in (spec §4.12 step 2).
    pub raw_intent: Intent,
    pub confidence: f64,
    pub candidate_metrics: Vec<String>,
    pub candidate_dimensions: Vec<String>,
    /// (dimension name, matched value) pairs found by scanning the question
    /// for a dimension's catalog-declared `sample_values` (spec §4.8).
    pub candidate_filters: Vec<(String, String)>,
    pub temporal_scope: Vec<String>,
    pub top_n: Option<u32>,
}

impl Default for Understanding {
    fn default() -> Self {
        Self {
            intent: Intent::Unknown,
            raw_intent: Intent::Unknown,
            confidence: 0.0,
            candidate_metrics: Vec::new(),
            candidate_dimensions: Vec::new(),
            candidate_filters: Vec::new(),
            temporal_scope: Vec::new(),
            top_n: None,
        }
    }
}

struct PatternSet {
    intent: Intent,
    patterns: Vec<Regex>,
}

static PATTERN_SETS: Lazy<Vec<PatternSet>> = Lazy::new(|| {
    vec![
        PatternSet {
            intent: Intent::TrendAnalysis,
            patterns: vec![
                Regex::new(r"(?i)\bover time\b").unwrap(),
                Regex::new(r"(?i)\btrend\b").unwrap(),
                Regex::new(r"(?i)\bchanging\b").unwrap(),
                Regex::new(r"(?i)\bhistory\b").unwrap(),
            ],
        },
        PatternSet {
            intent: Intent::Comparison,
            patterns: vec![
                Regex::new(r"(?i)\bcompare\b").unwrap(),
                Regex::new(r"(?i)\bby segment\b").unwrap(),
                Regex::new(r"(?i)\bby\s+\w+\b").unwrap(),
                Regex::new(r"(?i)\bversus\b|\bvs\.?\b").unwrap(),
            ],
        },
        PatternSet {
            intent: Intent::CohortAnalysis,
            patterns: vec![
                Regex::new(r"(?i)\bcohort\b").unwrap(),
                Regex::new(r"(?i)\bsign[- ]?up\b").unwrap(),
                Regex::new(r"(?i)\bretention\b").unwrap(),
            ],
        },
        PatternSet {
            intent: Intent::TopN,
            patterns: vec![
                Regex::new(r"(?i)\btop\s*\d*\b").unwrap(),
                Regex::new(r"(?i)\bhighest\b").unwrap(),
                Regex::new(r"(?i)\bleading\b").unwrap(),
            ],
        },
        PatternSet {
            intent: Intent::Filtering,
            patterns: vec![
                Regex::new(r"(?i)\bwhere\b").unwrap(),
                Regex::new(r"(?i)\bonly\b").unwrap(),
                Regex::new(r"(?i)\bfilter(ed)? by\b").unwrap(),
            ],
        },
        PatternSet {
            intent: Intent::MetricQuery,
            patterns: vec![
                Regex::new(r"(?i)\bwhat is\b").unwrap(),
                Regex::new(r"(?i)\bhow much\b").unwrap(),
                Regex::new(r"(?i)\bshow me\b").unwrap(),
                Regex::new(r"(?i)\bcurrent\b").unwrap(),
            ],
        },
    ]
});

static TOP_N_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\btop\s*(\d+)").unwrap());

static TEMPORAL_SCOPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(last month|last quarter|last year|over time|this month|this year|year to date|ytd)\b").unwrap()
});

/// Assigns an intent and extracts candidate entities from free text.
/// Confidence is a calibrated function of matched-pattern count and question
/// length; below 0.5 the caller (orchestrator) should emit guidance instead
/// of executing (spec §4.8).
pub fn classify(question: &str, catalog: &Catalog) -> Understanding {
    let mut best: Option<(Intent, usize)> = None;
    for set in PATTERN_SETS.iter() {
        let matches = set.patterns.iter().filter(|p| p.is_match(question)).count();
        if matches > 0 && best.map(|(_, m)| matches > m).unwrap_or(true) {
            best = Some((set.intent, matches));
        }
    }

    let (mut intent, mut match_count) = best.unwrap_or((Intent::Unknown, 0));

    let candidate_metrics = fuzzy_match_names(question, &catalog.metric_order);
    let candidate_dimensions = fuzzy_match_names(question, &catalog.dimension_order);
    let candidate_filters = extract_categorical_tokens(question, catalog);
    let temporal_scope = TEMPORAL_SCOPE_RE.find_iter(question).map(|m| m.as_str().to_lowercase()).collect();
    let top_n = TOP_N_RE.captures(question).and_then(|c| c[1].parse::<u32>().ok());

    // An explicit "top <digit>" is a stronger, more specific signal than the
    // generic comparison/metric-query patterns it may tie with, so it wins
    // ties rather than losing to whichever pattern set happens to come first,
    // and it counts toward confidence just as a matched keyword pattern does.
    if top_n.is_some() {
        intent = Intent::TopN;
        match_count += 1;
    }

    // An exact catalog metric name in the question is at least as strong a
    // signal as a keyword pattern match — it pins the request to a concrete,
    // known metric rather than a generic shape — so it counts toward
    // confidence the same way, with a floor so a short, unambiguous question
    // ("what is total_mrr") is not penalized purely for its brevity.
    let mut confidence = calibrate_confidence(match_count, question.len());
    if !candidate_metrics.is_empty() {
        confidence = confidence.max(0.6);
    }
    let raw_intent = intent;
    let intent = if confidence < 0.5 { Intent::Unknown } else { intent };

    Understanding {
        intent,
        raw_intent,
        confidence,
        candidate_metrics,
        candidate_dimensions,
        candidate_filters,
        temporal_scope,
        top_n,
    }
}

fn calibrate_confidence(match_count: usize, question_len: usize) -> f64 {
    if match_count == 0 {
        return 0.0;
    }
    let length_factor = (question_len as f64 / 40.0).min(1.0).max(0.3);
    (0.4 + 0.2 * match_count as f64).min(1.0) * length_factor
}

fn fuzzy_match_names(question: &str, names: &[String]) -> Vec<String> {
    let lower = question.to_lowercase();
    let question_words: Vec<&str> = lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()).collect();

    let mut matches: Vec<String> = names
        .iter()
        .filter(|name| {
            let display = name.replace('_', " ");
            if lower.contains(name.as_str()) || lower.contains(&display) {
                return true;
            }
            // Partial match: at least half of the name's underscore-separated
            // words appear somewhere in the question (shortest-distance
            // prefix/substring selection, spec §4.8).
            let name_words: Vec<&str> = name.split('_').filter(|w| w.len() > 2).collect();
            if name_words.is_empty() {
                return false;
            }
            let hits = name_words.iter().filter(|w| question_words.contains(w)).count();
            hits * 2 >= name_words.len()
        })
        .cloned()
        .collect();
    matches.sort();
    matches
}

/// Finds (dimension, value) pairs by matching each categorical dimension's
/// catalog-declared sample values against the question text (spec §4.8:
/// "listed in the catalog's sample-values hint").
fn extract_categorical_tokens(question: &str, catalog: &Catalog) -> Vec<(String, String)> {
    let lower = question.to_lowercase();
    let mut tokens = Vec::new();
    for dim in catalog.dimensions.values() {
        if dim.kind != DimensionKind::Categorical {
            continue;
        }
        for value in &dim.sample_values {
            if lower.contains(&value.to_lowercase()) {
                tokens.push((dim.name.clone(), value.clone()));
            }
        }
    }
    tokens.sort();
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::load::load_from_str;

    const SAMPLE: &str = r#"
semantic_model:
  metrics:
    - name: monthly_customer_count
      display_name: Monthly Customer Count
      kind: simple
      table: subscriptions
      aggregation: count_distinct
      column: customer_id
  dimensions:
    - name: snapshot_month
      display_name: Snapshot Month
      kind: temporal
      table: subscriptions
      sql_template: "strftime('%Y-%m', {{ Table }}.snapshot_date)"
      granularity: month
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#;

    #[test]
    fn classifies_trend_analysis() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let understanding = classify("How is my active customer count changing over time?", &catalog);
        assert_eq!(understanding.intent, Intent::TrendAnalysis);
        assert!(understanding.confidence >= 0.5);
    }

    #[test]
    fn low_confidence_returns_unknown() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let understanding = classify("hi", &catalog);
        assert_eq!(understanding.intent, Intent::Unknown);
    }

    #[test]
    fn extracts_top_n_digit() {
        let catalog = load_from_str(SAMPLE).unwrap();
        let understanding = classify("show me the top 5 customers", &catalog);
        assert_eq!(understanding.top_n, Some(5));
    }

    #[test]
    fn extracts_categorical_filter_value_from_sample_values() {
        let yaml = r#"
semantic_model:
  metrics:
    - name: monthly_customer_count
      display_name: Monthly Customer Count
      kind: simple
      table: subscriptions
      aggregation: count_distinct
      column: customer_id
  dimensions:
    - name: customer_segment
      display_name: Customer Segment
      kind: categorical
      table: customers
      column: segment
      sample_values: [Enterprise, Mid-Market, SMB]
  connection:
    backend: embedded-olap
    path: "./data/analytics.db"
"#;
        let catalog = load_from_str(yaml).unwrap();
        let understanding = classify("What is MRR only for Enterprise customers?", &catalog);
        assert_eq!(understanding.candidate_filters, vec![("customer_segment".to_string(), "Enterprise".to_string())]);
    }
}
