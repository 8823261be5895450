//! Domain models for wallet-service.

pub mod credit_cost;
pub mod transaction;
pub mod wallet;

pub use credit_cost::{default_credit_costs, lookup_cost, CreditCost};
pub use transaction::{
    ChargeOutcome, CreditTransaction, LedgerReceipt, TransactionCursor, TransactionKind,
};
pub use wallet::{cycle_end_after, NewWallet, Plan, PlanAllotments, Wallet};
