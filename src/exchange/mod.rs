//! Arkham exchange integration.
//!
//! REST-only: pair metadata, tickers, balances, and the order endpoints the
//! trading core polls. The `ExchangeGateway` trait is the seam between the
//! trading core and the wire; `MockExchange` implements it for tests.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::ArkhamClient;
pub use mock::MockExchange;
pub use traits::ExchangeGateway;
pub use types::*;
