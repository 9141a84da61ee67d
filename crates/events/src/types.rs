//! Enumerations carried inside event payloads
//!
//! Wire values are the upper-case codes used by the core banking system.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Kind of bank account
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum AccountType {
    /// Current (checking) account
    #[serde(rename = "COURANT")]
    #[strum(serialize = "COURANT")]
    Checking,

    /// Savings account
    #[serde(rename = "EPARGNE")]
    #[strum(serialize = "EPARGNE")]
    Savings,

    /// Account held by several clients
    #[serde(rename = "JOINT")]
    #[strum(serialize = "JOINT")]
    Joint,
}

/// Channel a deposit or withdrawal went through
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum Channel {
    /// Bank counter
    #[serde(rename = "GUICHET")]
    #[strum(serialize = "GUICHET")]
    Counter,

    /// Wire transfer
    #[serde(rename = "VIREMENT")]
    #[strum(serialize = "VIREMENT")]
    Wire,

    #[serde(rename = "CHEQUE")]
    #[strum(serialize = "CHEQUE")]
    Cheque,

    #[serde(rename = "CARTE")]
    #[strum(serialize = "CARTE")]
    Card,
}

/// Lifecycle of a transfer as reported by the issuing system
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum TransferStatus {
    #[default]
    #[serde(rename = "INITIE")]
    #[strum(serialize = "INITIE")]
    Initiated,

    #[serde(rename = "EN_COURS")]
    #[strum(serialize = "EN_COURS")]
    InProgress,

    #[serde(rename = "COMPLETE")]
    #[strum(serialize = "COMPLETE")]
    Completed,

    #[serde(rename = "REJETE")]
    #[strum(serialize = "REJETE")]
    Rejected,
}
