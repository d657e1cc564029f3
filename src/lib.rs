//! # Arkham Grid Bot
//!
//! Grid and volume market-making bot for the Arkham exchange.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Arkham REST client, gateway trait and test mock
//! - `trading`: Grid planning, order lifecycle and the engine loops
//! - `utils`: Shared decimal arithmetic helpers

pub mod config;
pub mod error;
pub mod exchange;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use error::BotError;
