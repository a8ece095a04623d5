//! Per-phase state patches with exclusive write ownership.
//!
//! Each phase may only emit its own patch variant, and each variant only
//! touches the fields that phase owns. The engine rejects a patch whose
//! owner does not match the phase that produced it, which is what turns the
//! "exclusive-write ownership per field" convention into a checked rule.

use battlecard_shared::{NewsItem, Phase, PricingRecord, RunState};

/// The state delta a successful phase attempt commits.
#[derive(Debug, Clone)]
pub enum StatePatch {
    /// Detect owns `official_site`, `description`, and `competitors`.
    Detect {
        official_site: Option<String>,
        description: Option<String>,
        competitors: Vec<String>,
    },
    /// Price owns `pricing_record`, replaced wholesale per successful attempt.
    Price { pricing_record: PricingRecord },
    /// Intelligence owns `news_items` (append-only, deduped by URL).
    Intelligence { news_items: Vec<NewsItem> },
    /// Synthesize owns `synthesis`, set once.
    Synthesize { synthesis: String },
    /// Deliver owns `artifact_path`.
    Deliver { artifact_path: String },
}

impl StatePatch {
    /// The phase allowed to emit this patch.
    pub fn owner(&self) -> Phase {
        match self {
            Self::Detect { .. } => Phase::Detect,
            Self::Price { .. } => Phase::Price,
            Self::Intelligence { .. } => Phase::Intelligence,
            Self::Synthesize { .. } => Phase::Synthesize,
            Self::Deliver { .. } => Phase::Deliver,
        }
    }

    /// Apply this patch to the run state. Only called by the engine, and only
    /// after the owning phase declared success — a failed attempt never gets
    /// this far, which is what makes patch application atomic.
    pub fn apply(self, state: &mut RunState) {
        match self {
            Self::Detect {
                official_site,
                description,
                competitors,
            } => {
                if official_site.is_some() {
                    state.official_site = official_site;
                }
                if description.is_some() {
                    state.description = description;
                }
                state.push_competitors(competitors);
            }
            Self::Price { pricing_record } => {
                // A present record must have at least one plan; an empty
                // extraction leaves the field absent.
                state.pricing_record = if pricing_record.is_empty() {
                    None
                } else {
                    Some(pricing_record)
                };
            }
            Self::Intelligence { news_items } => {
                for item in news_items {
                    state.push_news(item);
                }
            }
            Self::Synthesize { synthesis } => {
                state.synthesis = Some(synthesis);
            }
            Self::Deliver { artifact_path } => {
                state.artifact_path = Some(artifact_path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use battlecard_shared::PricingPlan;

    #[test]
    fn owners_match_variants() {
        let patch = StatePatch::Synthesize {
            synthesis: "narrative".into(),
        };
        assert_eq!(patch.owner(), Phase::Synthesize);

        let patch = StatePatch::Price {
            pricing_record: PricingRecord::new(),
        };
        assert_eq!(patch.owner(), Phase::Price);
    }

    #[test]
    fn detect_patch_sets_identity_fields() {
        let mut state = RunState::new("Acme Corp");
        StatePatch::Detect {
            official_site: Some("https://acme.example.com".into()),
            description: Some("Rocket-powered tooling.".into()),
            competitors: vec!["Globex".into(), "Initech".into()],
        }
        .apply(&mut state);

        assert_eq!(state.official_site.as_deref(), Some("https://acme.example.com"));
        assert_eq!(state.competitors.len(), 2);
        // company_name untouched
        assert_eq!(state.company_name, "Acme Corp");
    }

    #[test]
    fn empty_pricing_record_stays_absent() {
        let mut state = RunState::new("Acme Corp");
        StatePatch::Price {
            pricing_record: PricingRecord::new(),
        }
        .apply(&mut state);
        assert!(state.pricing_record.is_none());
    }

    #[test]
    fn pricing_record_replaced_wholesale() {
        let mut state = RunState::new("Acme Corp");

        let mut first = PricingRecord::new();
        first.insert(
            "Old".into(),
            PricingPlan {
                price: "$1".into(),
                billing_period: None,
                features: vec![],
            },
        );
        StatePatch::Price {
            pricing_record: first,
        }
        .apply(&mut state);

        let mut second = PricingRecord::new();
        second.insert(
            "Pro".into(),
            PricingPlan {
                price: "$12/month".into(),
                billing_period: None,
                features: vec![],
            },
        );
        StatePatch::Price {
            pricing_record: second,
        }
        .apply(&mut state);

        let record = state.pricing_record.unwrap();
        assert!(!record.contains_key("Old"));
        assert_eq!(record["Pro"].price, "$12/month");
    }

    #[test]
    fn intelligence_patch_appends_with_dedup() {
        let mut state = RunState::new("Acme Corp");
        state.push_news(NewsItem {
            headline: "Existing".into(),
            url: "https://example.com/a".into(),
            sentiment_score: 0.1,
        });

        StatePatch::Intelligence {
            news_items: vec![
                NewsItem {
                    headline: "Duplicate".into(),
                    url: "https://example.com/a".into(),
                    sentiment_score: 0.5,
                },
                NewsItem {
                    headline: "Fresh".into(),
                    url: "https://example.com/b".into(),
                    sentiment_score: 0.9,
                },
            ],
        }
        .apply(&mut state);

        assert_eq!(state.news_items.len(), 2);
        assert_eq!(state.news_items[0].headline, "Existing");
    }
}
