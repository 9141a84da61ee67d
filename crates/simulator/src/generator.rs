//! Builds events of a requested kind from fake data
//!
//! Opened accounts are remembered in a bounded pool so later deposits,
//! withdrawals, transfers and closures hit accounts the ledger knows.

use crate::fake::FakeData;
use edalab_core::Amount;
use edalab_events::{
    AccountClosed, AccountOpened, Deposited, Event, EventKind, TransferInitiated, Withdrawn,
};
use std::collections::VecDeque;

pub const DEFAULT_POOL_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
struct KnownAccount {
    account_id: String,
    client_id: String,
}

pub struct EventGenerator {
    fake: FakeData,
    pool: VecDeque<KnownAccount>,
    capacity: usize,
}

impl EventGenerator {
    pub fn new(fake: FakeData) -> Self {
        Self::with_capacity(fake, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(fake: FakeData, capacity: usize) -> Self {
        Self {
            fake,
            pool: VecDeque::with_capacity(capacity.min(DEFAULT_POOL_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Accounts currently remembered
    pub fn known_accounts(&self) -> usize {
        self.pool.len()
    }

    pub fn generate(&mut self, kind: EventKind) -> Event {
        match kind {
            EventKind::AccountOpened => self.account_opened().into(),
            EventKind::AccountClosed => self.account_closed().into(),
            EventKind::Deposited => {
                let account = self.pick_account();
                let amount = self.fake.deposit_amount();
                let channel = self.fake.channel();
                Deposited::new(account.account_id, amount, channel, self.fake.reference()).into()
            }
            EventKind::Withdrawn => {
                let account = self.pick_account();
                let amount = self.fake.withdrawal_amount();
                let channel = self.fake.channel();
                Withdrawn::new(account.account_id, amount, channel, self.fake.reference()).into()
            }
            EventKind::TransferInitiated => self.transfer().into(),
        }
    }

    fn account_opened(&mut self) -> AccountOpened {
        let account = KnownAccount {
            account_id: self.fake.account_id(),
            client_id: self.fake.client_id(),
        };
        let mut event = AccountOpened::new(
            account.account_id.clone(),
            account.client_id.clone(),
            self.fake.account_type(),
            self.fake.initial_balance(),
        );
        event
            .metadata
            .insert("source".to_string(), "simulator".to_string());

        if self.pool.len() == self.capacity {
            self.pool.pop_front();
        }
        self.pool.push_back(account);
        event
    }

    fn account_closed(&mut self) -> AccountClosed {
        // A closed account is forgotten so nothing targets it afterwards
        let account = if self.pool.is_empty() {
            self.fresh_account()
        } else {
            let index = self.fake.index(self.pool.len());
            match self.pool.remove(index) {
                Some(account) => account,
                None => self.fresh_account(),
            }
        };
        AccountClosed::new(
            account.account_id,
            account.client_id,
            Amount::ZERO,
            "client request",
        )
    }

    fn transfer(&mut self) -> TransferInitiated {
        let (source, dest) = if self.pool.len() >= 2 {
            let source = self.fake.index(self.pool.len());
            let mut dest = self.fake.index(self.pool.len() - 1);
            if dest >= source {
                dest += 1;
            }
            (
                self.pool[source].account_id.clone(),
                self.pool[dest].account_id.clone(),
            )
        } else {
            (self.fake.account_id(), self.fake.account_id())
        };

        let amount = self.fake.transfer_amount();
        let reason = self.fake.transfer_reason();
        TransferInitiated::new(source, dest, amount, reason, self.fake.reference())
    }

    fn pick_account(&mut self) -> KnownAccount {
        if self.pool.is_empty() {
            return self.fresh_account();
        }
        let index = self.fake.index(self.pool.len());
        self.pool[index].clone()
    }

    fn fresh_account(&mut self) -> KnownAccount {
        KnownAccount {
            account_id: self.fake.account_id(),
            client_id: self.fake.client_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> EventGenerator {
        EventGenerator::with_capacity(FakeData::with_seed(42), 4)
    }

    fn account_of(event: &Event) -> String {
        match event {
            Event::AccountOpened(e) => e.account_id.clone(),
            Event::AccountClosed(e) => e.account_id.clone(),
            Event::Deposited(e) => e.account_id.clone(),
            Event::Withdrawn(e) => e.account_id.clone(),
            Event::TransferInitiated(e) => e.source_account_id.clone(),
        }
    }

    #[test]
    fn test_generates_requested_kind() {
        let mut generator = generator();
        for kind in [
            EventKind::AccountOpened,
            EventKind::Deposited,
            EventKind::Withdrawn,
            EventKind::TransferInitiated,
            EventKind::AccountClosed,
        ] {
            assert_eq!(generator.generate(kind).kind(), kind);
        }
    }

    #[test]
    fn test_movements_target_opened_accounts() {
        let mut generator = generator();
        let opened = account_of(&generator.generate(EventKind::AccountOpened));
        for _ in 0..5 {
            assert_eq!(account_of(&generator.generate(EventKind::Deposited)), opened);
        }
    }

    #[test]
    fn test_transfer_uses_two_distinct_known_accounts() {
        let mut generator = generator();
        let a = account_of(&generator.generate(EventKind::AccountOpened));
        let b = account_of(&generator.generate(EventKind::AccountOpened));

        for _ in 0..10 {
            match generator.generate(EventKind::TransferInitiated) {
                Event::TransferInitiated(t) => {
                    assert_ne!(t.source_account_id, t.dest_account_id);
                    assert!([&a, &b].contains(&&t.source_account_id));
                    assert!([&a, &b].contains(&&t.dest_account_id));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_pool_is_bounded_and_closing_forgets() {
        let mut generator = generator();
        for _ in 0..10 {
            generator.generate(EventKind::AccountOpened);
        }
        assert_eq!(generator.known_accounts(), 4);

        generator.generate(EventKind::AccountClosed);
        assert_eq!(generator.known_accounts(), 3);
    }

    #[test]
    fn test_empty_pool_falls_back_to_fresh_ids() {
        let mut generator = generator();
        let deposit = generator.generate(EventKind::Deposited);
        assert!(account_of(&deposit).starts_with("CPT-"));
        assert_eq!(generator.known_accounts(), 0);
    }
}
