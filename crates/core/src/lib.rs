//! EDA-Lab Core - Money types
//!
//! Shared by every crate that touches balances:
//! - `Amount`: non-negative decimal used for event amounts and balances
//! - `Currency`: account/event currency code, `EUR` unless stated otherwise

pub mod amount;
pub mod currency;

pub use amount::{Amount, AmountError};
pub use currency::{Currency, CurrencyError};
