//! Core domain types for BattleCard runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One stage of the battle-card pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Detect,
    Price,
    Intelligence,
    Synthesize,
    Deliver,
}

impl Phase {
    /// Stable string form used in logs, history entries, and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::Price => "price",
            Self::Intelligence => "intelligence",
            Self::Synthesize => "synthesize",
            Self::Deliver => "deliver",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// A single pricing plan extracted from a vendor's pricing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingPlan {
    /// Price with currency as stated on the page (e.g., "$7.25/month").
    pub price: String,
    /// Billing period if stated ("monthly", "annual", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_period: Option<String>,
    /// Headline features listed for this plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

/// Structured pricing for one company: plan name → plan details.
///
/// BTreeMap keeps plan ordering stable across serializations. An empty record
/// is a valid outcome (the document contained no pricing); `RunState` stores
/// `None` until the Price phase commits, then replaces wholesale per attempt.
pub type PricingRecord = BTreeMap<String, PricingPlan>;

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

/// One news/blog headline with a sentiment score in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub headline: String,
    pub url: String,
    pub sentiment_score: f64,
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

/// How a single phase attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseResolution {
    Success,
    Retry,
    Abort,
}

impl PhaseResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retry => "retry",
            Self::Abort => "abort",
        }
    }
}

/// One entry in the run's phase history — exactly one per attempt executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    /// 1-based attempt counter within the phase.
    pub attempt: u32,
    pub outcome: PhaseResolution,
}

/// One entry in the run's error log. Never cleared, even after a later
/// attempt succeeds — the log is how callers tell "no data" apart from
/// "data withheld due to failure".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub phase: Phase,
    pub attempt: u32,
    pub kind: crate::error::ErrorKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// The single mutable record threaded through the workflow graph.
///
/// Owned exclusively by the workflow engine for the duration of one run.
/// Field write-ownership is per phase (Detect owns `official_site`/
/// `description`/`competitors`, Price owns `pricing_record`, and so on);
/// the engine enforces this by only accepting a phase's own patch type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Company under analysis. Set once at start, immutable thereafter.
    pub company_name: String,
    /// Official website URL, set by Detect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub official_site: Option<String>,
    /// One-sentence company description, set by Detect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Competitors in discovery order. Append-only.
    #[serde(default)]
    pub competitors: Vec<String>,
    /// Structured pricing, replaced wholesale per successful Price attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_record: Option<PricingRecord>,
    /// News headlines, append-only, deduplicated by URL.
    #[serde(default)]
    pub news_items: Vec<NewsItem>,
    /// Final strategic narrative, set once by Synthesize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
    /// Path of the delivered battle-card artifact, set by Deliver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    /// Complete, ordered record of every phase attempt.
    #[serde(default)]
    pub phase_history: Vec<PhaseRecord>,
    /// All errors encountered, retried or not. Append-only.
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl RunState {
    /// Initialize state for a new run. The company name is stored as given;
    /// emptiness is the Detect phase's abort condition, not a constructor
    /// panic, so the run still produces a truthful history entry.
    pub fn new(company_name: impl Into<String>) -> Self {
        Self {
            company_name: company_name.into(),
            official_site: None,
            description: None,
            competitors: Vec::new(),
            pricing_record: None,
            news_items: Vec::new(),
            synthesis: None,
            artifact_path: None,
            phase_history: Vec::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Append a news item unless one with the same URL is already present.
    pub fn push_news(&mut self, item: NewsItem) {
        if !self.news_items.iter().any(|n| n.url == item.url) {
            self.news_items.push(item);
        }
    }

    /// Append competitors, preserving discovery order and skipping
    /// case-insensitive duplicates.
    pub fn push_competitors(&mut self, names: impl IntoIterator<Item = String>) {
        for name in names {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                continue;
            }
            let exists = self
                .competitors
                .iter()
                .any(|c| c.eq_ignore_ascii_case(trimmed));
            if !exists {
                self.competitors.push(trimmed.to_string());
            }
        }
    }

    /// Number of attempts recorded for a given phase.
    pub fn attempts_for(&self, phase: Phase) -> u32 {
        self.phase_history
            .iter()
            .filter(|r| r.phase == phase)
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn news_dedup_by_url() {
        let mut state = RunState::new("Acme Corp");
        state.push_news(NewsItem {
            headline: "Acme raises Series B".into(),
            url: "https://example.com/a".into(),
            sentiment_score: 0.6,
        });
        state.push_news(NewsItem {
            headline: "Duplicate coverage of the raise".into(),
            url: "https://example.com/a".into(),
            sentiment_score: 0.2,
        });
        state.push_news(NewsItem {
            headline: "Acme ships v2".into(),
            url: "https://example.com/b".into(),
            sentiment_score: 0.9,
        });
        assert_eq!(state.news_items.len(), 2);
        // First occurrence wins.
        assert_eq!(state.news_items[0].headline, "Acme raises Series B");
    }

    #[test]
    fn competitors_preserve_order_and_dedup() {
        let mut state = RunState::new("Acme Corp");
        state.push_competitors(["Globex".to_string(), "Initech".to_string()]);
        state.push_competitors(["globex".to_string(), " Umbrella ".to_string(), "".to_string()]);
        assert_eq!(state.competitors, vec!["Globex", "Initech", "Umbrella"]);
    }

    #[test]
    fn attempts_counted_per_phase() {
        let mut state = RunState::new("Acme Corp");
        for attempt in 1..=3 {
            state.phase_history.push(PhaseRecord {
                phase: Phase::Price,
                attempt,
                outcome: PhaseResolution::Retry,
            });
        }
        state.phase_history.push(PhaseRecord {
            phase: Phase::Detect,
            attempt: 1,
            outcome: PhaseResolution::Success,
        });
        assert_eq!(state.attempts_for(Phase::Price), 3);
        assert_eq!(state.attempts_for(Phase::Detect), 1);
        assert_eq!(state.attempts_for(Phase::Deliver), 0);
    }

    #[test]
    fn state_serialization_roundtrip() {
        let mut state = RunState::new("Acme Corp");
        let mut pricing = PricingRecord::new();
        pricing.insert(
            "Pro".into(),
            PricingPlan {
                price: "$12/month".into(),
                billing_period: Some("monthly".into()),
                features: vec!["SSO".into()],
            },
        );
        state.pricing_record = Some(pricing);

        let json = serde_json::to_string(&state).expect("serialize");
        let parsed: RunState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.company_name, "Acme Corp");
        let record = parsed.pricing_record.expect("pricing present");
        assert_eq!(record["Pro"].price, "$12/month");
    }

    #[test]
    fn phase_string_forms() {
        assert_eq!(Phase::Detect.as_str(), "detect");
        assert_eq!(Phase::Intelligence.to_string(), "intelligence");
        assert_eq!(RunStatus::Complete.as_str(), "complete");
    }
}
