// Entity models
//
// Each entity is a plain struct plus free functions over a `&Connection`.
// User-scoped lookups always filter by owner, so another user's row
// looks exactly like a missing one.

pub mod budget;
pub mod category;
pub mod debt;
pub mod economic;
pub mod financial_goal;
pub mod investment;
pub mod investment_transaction;
pub mod payment;
pub mod recurring;
pub mod subscription;
pub mod user;

pub use budget::{Budget, BudgetParams, BudgetStatus};
pub use category::{Category, CategoryParams, CategoryPreset, CategoryType};
pub use debt::{Debt, DebtParams, DebtStatus};
pub use economic::{BnnbData, EconomicIndicator, FoodComparison, NewBasket};
pub use financial_goal::{FinancialGoal, GoalParams, GoalScope, GoalType, Priority};
pub use investment::{Investment, InvestmentParams, Portfolio};
pub use investment_transaction::{InvestmentTransaction, InvestmentTransactionParams, TransactionType};
pub use payment::{Payment, PaymentMethod, PaymentParams};
pub use recurring::{Frequency, RecurringParams, RecurringTransaction};
pub use subscription::{Plan, Subscription, SubscriptionStatus};
pub use user::{Role, User, UserParams};
