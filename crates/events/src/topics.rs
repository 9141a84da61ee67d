//! Topic names

pub const ACCOUNT_OPENED: &str = "banking.account.opened";
pub const ACCOUNT_CLOSED: &str = "banking.account.closed";
pub const DEPOSIT_COMPLETED: &str = "banking.deposit.completed";
pub const WITHDRAWAL_COMPLETED: &str = "banking.withdrawal.completed";
pub const TRANSFER_INITIATED: &str = "banking.transfer.initiated";

/// Undecodable messages are parked here by consumers that enable dead-lettering
pub const DEAD_LETTER: &str = "system.dlq";

/// Wildcard subscription understood by the stream hub
pub const WILDCARD: &str = "*";

/// Schema registry subject for a topic's value schema
pub fn value_subject(topic: &str) -> String {
    format!("{}-value", topic)
}

/// All domain topics, in the order the ledger consumer subscribes to them
pub fn banking_topics() -> Vec<&'static str> {
    vec![
        ACCOUNT_OPENED,
        ACCOUNT_CLOSED,
        DEPOSIT_COMPLETED,
        WITHDRAWAL_COMPLETED,
        TRANSFER_INITIATED,
    ]
}
