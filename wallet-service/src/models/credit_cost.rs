//! Per-feature credit cost.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Cost of one chargeable action, keyed by feature.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CreditCost {
    pub feature_key: String,
    pub cost: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CreditCost {
    pub fn new(feature_key: impl Into<String>, cost: i64) -> Self {
        Self {
            feature_key: feature_key.into(),
            cost,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Cost table the service ships with. Mirrors the seed migration so the
/// memory backend meters the same features as a fresh database.
pub fn default_credit_costs() -> Vec<CreditCost> {
    [
        ("listening_party_create", 800, "Host a live listening party"),
        ("ad_diagnostics_run", 500, "Run a Meta ads diagnostics report"),
        ("ad_campaign_launch", 1500, "Launch an ad campaign"),
        ("split_sheet_create", 200, "Create a split sheet for negotiation"),
        ("split_sheet_send", 100, "Send a split sheet to collaborators"),
        ("smart_link_create", 50, "Create a smart link"),
        ("ai_caption_generate", 150, "Generate social captions"),
        ("cover_art_generate", 1000, "Generate cover art"),
        ("fan_message_blast", 300, "Send a message to the fan list"),
        ("course_lesson_view", 0, "View a marketing course lesson"),
        ("onboarding_step_complete", 0, "Complete an onboarding checklist step"),
    ]
    .into_iter()
    .map(|(key, cost, description)| CreditCost::new(key, cost).with_description(description))
    .collect()
}

/// Find a feature's cost in a fetched table.
pub fn lookup_cost(costs: &[CreditCost], feature_key: &str) -> Option<i64> {
    costs
        .iter()
        .find(|c| c.feature_key == feature_key)
        .map(|c| c.cost)
}
