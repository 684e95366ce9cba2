// 💳 Subscription plans and per-user subscription state
//
// Every user ends up with a subscription; the free plan is created on demand.
// Plan features are copied onto the row so a plan change later never rewrites
// what an existing subscriber was sold.

use crate::db::{enum_column, json_column};
use anyhow::Result;
use chrono::{Duration, Months, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

// ============================================================================
// PLANS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Standard,
    Premium,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Standard => "standard",
            Plan::Premium => "premium",
        }
    }

    pub fn parse(raw: &str) -> Option<Plan> {
        match raw {
            "free" => Some(Plan::Free),
            "standard" => Some(Plan::Standard),
            "premium" => Some(Plan::Premium),
            _ => None,
        }
    }

    pub fn all() -> [Plan; 3] {
        [Plan::Free, Plan::Standard, Plan::Premium]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Standard => "Standard",
            Plan::Premium => "Premium",
        }
    }

    /// Monthly price in kwacha
    pub fn price(&self) -> f64 {
        match self {
            Plan::Free => 0.0,
            Plan::Standard => 135.0,
            Plan::Premium => 270.0,
        }
    }

    pub fn features(&self) -> PlanFeatures {
        match self {
            Plan::Free => PlanFeatures {
                max_categories: 10,
                max_budgets: 5,
                advanced_analytics: false,
                export_reports: false,
                shopping_lists: false,
                ai_insights: false,
                debt_strategies: false,
            },
            Plan::Standard => PlanFeatures {
                max_categories: 50,
                max_budgets: 20,
                advanced_analytics: true,
                export_reports: true,
                shopping_lists: true,
                ai_insights: false,
                debt_strategies: false,
            },
            Plan::Premium => PlanFeatures {
                max_categories: UNLIMITED,
                max_budgets: UNLIMITED,
                advanced_analytics: true,
                export_reports: true,
                shopping_lists: true,
                ai_insights: true,
                debt_strategies: true,
            },
        }
    }
}

/// Quota value meaning "no limit"
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFeatures {
    pub max_categories: i64,
    pub max_budgets: i64,
    pub advanced_analytics: bool,
    pub export_reports: bool,
    pub shopping_lists: bool,
    pub ai_insights: bool,
    pub debt_strategies: bool,
}

impl Default for PlanFeatures {
    fn default() -> Self {
        Plan::Free.features()
    }
}

impl PlanFeatures {
    /// Look up a boolean feature flag by name; unknown names are denied
    pub fn allows(&self, feature: &str) -> bool {
        match feature {
            "advanced_analytics" => self.advanced_analytics,
            "export_reports" => self.export_reports,
            "shopping_lists" => self.shopping_lists,
            "ai_insights" => self.ai_insights,
            "debt_strategies" => self.debt_strategies,
            _ => false,
        }
    }
}

/// Convert a stored quota into an optional limit (`None` = unlimited)
pub fn quota(value: i64) -> Option<usize> {
    if value < 0 {
        None
    } else {
        Some(value as usize)
    }
}

// ============================================================================
// SUBSCRIPTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    Expired,
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Pending => "pending",
        }
    }

    pub fn parse(raw: &str) -> Option<SubscriptionStatus> {
        match raw {
            "active" => Some(SubscriptionStatus::Active),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "expired" => Some(SubscriptionStatus::Expired),
            "pending" => Some(SubscriptionStatus::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
    pub amount: f64,
    pub features: PlanFeatures,
}

impl Subscription {
    /// Active status and not past its end
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date.map_or(true, |end| end > now)
    }

    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.end_date.map_or(false, |end| end < now)
    }

    /// Whole days left, rounded up; `None` means it never ends
    pub fn days_remaining(&self, now: NaiveDateTime) -> Option<i64> {
        let end = self.end_date?;
        if self.is_expired(now) {
            return Some(0);
        }
        let seconds = (end - now).num_seconds();
        Some((seconds + 86_399) / 86_400)
    }

    pub fn can_access_feature(&self, feature: &str, now: NaiveDateTime) -> bool {
        self.is_active(now) && self.features.allows(feature)
    }

    /// Move to another plan. Premium never steps down to standard; asking for
    /// the current plan is a successful no-op.
    pub fn upgrade_to(&mut self, plan: Plan, now: NaiveDateTime) -> bool {
        if self.plan == Plan::Premium && plan == Plan::Standard {
            return false;
        }
        if self.plan == plan {
            return true;
        }

        self.plan = plan;
        self.amount = plan.price();
        self.features = plan.features();
        self.start_date = now;
        self.end_date = match plan {
            Plan::Free => None,
            _ => now
                .checked_add_months(Months::new(1))
                .or_else(|| now.checked_add_signed(Duration::days(30))),
        };
        self.status = SubscriptionStatus::Active;
        true
    }

    pub fn cancel(&mut self, now: NaiveDateTime) -> bool {
        if !self.is_active(now) {
            return false;
        }
        self.status = SubscriptionStatus::Canceled;
        true
    }
}

// ============================================================================
// PERSISTENCE
// ============================================================================

const COLUMNS: &str = "id, user_id, plan_name, status, start_date, end_date, amount, features";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan: enum_column(2, row.get(2)?, Plan::parse)?,
        status: enum_column(3, row.get(3)?, SubscriptionStatus::parse)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        amount: row.get(6)?,
        features: json_column(7, row.get(7)?)?,
    })
}

pub fn find_for_user(conn: &Connection, user_id: i64) -> Result<Option<Subscription>> {
    let subscription = conn
        .query_row(
            &format!("SELECT {} FROM subscriptions WHERE user_id = ?1", COLUMNS),
            [user_id],
            from_row,
        )
        .optional()?;
    Ok(subscription)
}

/// Create the free subscription; `None` when the user already has one
pub fn create_free(
    conn: &Connection,
    user_id: i64,
    now: NaiveDateTime,
) -> Result<Option<Subscription>> {
    if find_for_user(conn, user_id)?.is_some() {
        return Ok(None);
    }

    let features = Plan::Free.features();
    conn.execute(
        "INSERT INTO subscriptions (user_id, plan_name, status, start_date, end_date, amount, features)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
        params![
            user_id,
            Plan::Free.as_str(),
            SubscriptionStatus::Active.as_str(),
            now,
            Plan::Free.price(),
            serde_json::to_string(&features)?,
        ],
    )?;

    Ok(Some(Subscription {
        id: conn.last_insert_rowid(),
        user_id,
        plan: Plan::Free,
        status: SubscriptionStatus::Active,
        start_date: now,
        end_date: None,
        amount: Plan::Free.price(),
        features,
    }))
}

/// The user's subscription, creating the free one when missing
pub fn ensure(conn: &Connection, user_id: i64, now: NaiveDateTime) -> Result<Subscription> {
    if let Some(existing) = find_for_user(conn, user_id)? {
        return Ok(existing);
    }
    match create_free(conn, user_id, now)? {
        Some(created) => Ok(created),
        None => Err(anyhow::anyhow!("subscription for user {} vanished", user_id)),
    }
}

pub fn save(conn: &Connection, subscription: &Subscription) -> Result<()> {
    conn.execute(
        "UPDATE subscriptions
         SET plan_name = ?1, status = ?2, start_date = ?3, end_date = ?4, amount = ?5, features = ?6
         WHERE id = ?7",
        params![
            subscription.plan.as_str(),
            subscription.status.as_str(),
            subscription.start_date,
            subscription.end_date,
            subscription.amount,
            serde_json::to_string(&subscription.features)?,
            subscription.id,
        ],
    )?;
    Ok(())
}
