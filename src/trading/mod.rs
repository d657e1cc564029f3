//! Trading core: grid planning, order lifecycle and the two engine loops.

pub mod balance;
pub mod delay;
pub mod deviation;
pub mod engine;
pub mod grid;
pub mod lifecycle;
pub mod position;
pub mod trailing;
pub mod volume;

use crate::config::TradingMode;
use rust_decimal::Decimal;

/// Progress notifications the engines push to the frontend task.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Engine entered its main loop.
    Started { mode: TradingMode },
    /// A buy ladder is resting on the book.
    GridArmed { levels: usize },
    /// A tracked order left the book and was booked as a fill.
    FillDetected {
        order_id: String,
        price: Decimal,
        size: Decimal,
    },
    /// Remaining pre-sell delay in volume mode.
    DelayTick { remaining_secs: f64 },
    /// A buy-sell round trip finished.
    CycleCompleted,
    /// A recoverable engine error; the loop backs off and continues.
    Error(String),
    /// Engine exited its loop.
    Stopped,
}

pub use balance::BalanceReconciler;
pub use delay::DelayScheduler;
pub use deviation::PriceDeviationTracker;
pub use engine::GridEngine;
pub use lifecycle::OrderLifecycleManager;
pub use position::PositionTracker;
pub use trailing::{TrailingMonitor, TrailingOutcome};
pub use volume::VolumeEngine;
