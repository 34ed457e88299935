pub mod evaluator;
pub mod lifecycle;
pub mod pnl;
pub mod signal;
pub mod store;

pub use evaluator::{TargetEvaluation, TargetEvaluator, TerminalReason};
pub use lifecycle::{
    ExpiryPolicy, TradeLifecycleManager, TradeState, TradeStatus, Transition, VerificationSummary,
};
pub use pnl::{PnL, PnlCalculator};
pub use signal::{SignalRequest, Target, TargetLadder, TradeSignal};
pub use store::{JsonFileStore, MemoryStore, TradeRecord, TradeScope, TradeStore};
