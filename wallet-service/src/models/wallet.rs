//! Credit wallet model.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Subscription tier controlling bypass behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Operator,
    Growth,
    Scale,
}

#[derive(Debug, Error)]
#[error("Unknown plan: {0}")]
pub struct ParsePlanError(pub String);

impl Plan {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Operator => "operator",
            Plan::Growth => "growth",
            Plan::Scale => "scale",
        }
    }

    /// Scale never blocks on balance.
    pub fn bypasses_balance(&self) -> bool {
        matches!(self, Plan::Scale)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Plan {
    type Err = ParsePlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "operator" => Ok(Plan::Operator),
            "growth" => Ok(Plan::Growth),
            "scale" => Ok(Plan::Scale),
            _ => Err(ParsePlanError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Plan {
    type Error = ParsePlanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Monthly credit allotment per plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAllotments {
    pub operator: i64,
    pub growth: i64,
    pub scale: i64,
}

impl PlanAllotments {
    pub fn for_plan(&self, plan: Plan) -> i64 {
        match plan {
            Plan::Operator => self.operator,
            Plan::Growth => self.growth,
            Plan::Scale => self.scale,
        }
    }
}

impl Default for PlanAllotments {
    fn default() -> Self {
        Self {
            operator: 30_000,
            growth: 65_000,
            scale: 250_000,
        }
    }
}

/// Per-user credit wallet.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub plan: Plan,
    pub monthly_credits: i64,
    pub credits_remaining: i64,
    pub credits_used: i64,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Wallet {
    /// Balance check ignoring plan bypass.
    pub fn has_balance_for(&self, cost: i64) -> bool {
        self.credits_remaining >= cost
    }

    /// Whether an action costing `cost` may proceed without a charge error.
    pub fn can_afford(&self, cost: i64) -> bool {
        cost <= 0 || self.plan.bypasses_balance() || self.has_balance_for(cost)
    }

    pub fn cycle_expired(&self, now: DateTime<Utc>) -> bool {
        self.cycle_end <= now
    }

    /// `credits_used + credits_remaining == monthly_credits`.
    ///
    /// Drifts after a plan change and for scale wallets; rollover restores it.
    pub fn is_balanced(&self) -> bool {
        self.credits_used + self.credits_remaining == self.monthly_credits
    }
}

/// Seed values for a lazily provisioned wallet.
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub user_id: Uuid,
    pub plan: Plan,
    pub monthly_credits: i64,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
}

impl NewWallet {
    pub fn starting_at(user_id: Uuid, plan: Plan, monthly_credits: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan,
            monthly_credits,
            cycle_start: now,
            cycle_end: cycle_end_after(now),
        }
    }

    /// Materialize the row the store would create.
    pub fn into_wallet(self, now: DateTime<Utc>) -> Wallet {
        Wallet {
            user_id: self.user_id,
            plan: self.plan,
            monthly_credits: self.monthly_credits,
            credits_remaining: self.monthly_credits,
            credits_used: 0,
            cycle_start: self.cycle_start,
            cycle_end: self.cycle_end,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// End of an accounting cycle starting at `start`: one calendar month later.
pub fn cycle_end_after(start: DateTime<Utc>) -> DateTime<Utc> {
    start
        .checked_add_months(Months::new(1))
        .unwrap_or_else(|| start + Duration::days(30))
}
