//! Random but plausible field values

use edalab_core::Amount;
use edalab_events::{AccountType, Channel};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const REFERENCE_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

const TRANSFER_REASONS: &[&str] = &[
    "Monthly rent",
    "Refund",
    "Invoice",
    "Family transfer",
    "Online purchase",
    "Subscription",
    "Salary",
    "Monthly savings",
    "Miscellaneous fees",
    "Service payment",
];

/// Seedable source of identifiers, amounts and enum values
pub struct FakeData {
    rng: StdRng,
}

impl FakeData {
    /// Same seed, same sequence
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn account_id(&mut self) -> String {
        format!("CPT-{:012X}", self.rng.gen::<u64>() & 0xFFFF_FFFF_FFFF)
    }

    pub fn client_id(&mut self) -> String {
        format!("CLI-{:08X}", self.rng.gen::<u32>())
    }

    /// Amount with cent precision in `[min, max]` whole units
    pub fn amount(&mut self, min: u64, max: u64) -> Amount {
        let cents = self.rng.gen_range(min * 100..=max * 100);
        Amount::from_minor(cents, 2)
    }

    pub fn initial_balance(&mut self) -> Amount {
        self.amount(0, 10_000)
    }

    pub fn deposit_amount(&mut self) -> Amount {
        self.amount(10, 5_000)
    }

    pub fn withdrawal_amount(&mut self) -> Amount {
        self.amount(10, 1_000)
    }

    pub fn transfer_amount(&mut self) -> Amount {
        self.amount(10, 2_000)
    }

    /// 70% checking, 20% savings, 10% joint
    pub fn account_type(&mut self) -> AccountType {
        let roll: f64 = self.rng.gen();
        if roll < 0.7 {
            AccountType::Checking
        } else if roll < 0.9 {
            AccountType::Savings
        } else {
            AccountType::Joint
        }
    }

    /// 40% wire, 30% counter, 20% card, 10% cheque
    pub fn channel(&mut self) -> Channel {
        let roll: f64 = self.rng.gen();
        if roll < 0.4 {
            Channel::Wire
        } else if roll < 0.7 {
            Channel::Counter
        } else if roll < 0.9 {
            Channel::Card
        } else {
            Channel::Cheque
        }
    }

    pub fn reference(&mut self) -> String {
        let suffix: String = (0..8)
            .map(|_| REFERENCE_CHARS[self.rng.gen_range(0..REFERENCE_CHARS.len())] as char)
            .collect();
        format!("REF-{suffix}")
    }

    pub fn transfer_reason(&mut self) -> &'static str {
        TRANSFER_REASONS[self.rng.gen_range(0..TRANSFER_REASONS.len())]
    }

    /// Uniform index below `len`, which must be non-zero
    pub(crate) fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_same_seed_same_values() {
        let mut a = FakeData::with_seed(7);
        let mut b = FakeData::with_seed(7);
        for _ in 0..20 {
            assert_eq!(a.account_id(), b.account_id());
            assert_eq!(a.deposit_amount(), b.deposit_amount());
            assert_eq!(a.reference(), b.reference());
        }
    }

    #[test]
    fn test_identifier_shapes() {
        let mut fake = FakeData::with_seed(1);
        let account = fake.account_id();
        assert!(account.starts_with("CPT-"));
        assert_eq!(account.len(), 16);
        assert_eq!(fake.client_id().len(), 12);

        let reference = fake.reference();
        assert_eq!(reference.len(), 12);
        assert!(reference[4..]
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()));
    }

    #[test]
    fn test_amounts_stay_in_range() {
        let mut fake = FakeData::with_seed(3);
        let low = Amount::from_units(10);
        let high = Amount::from_units(1_000);
        for _ in 0..500 {
            let amount = fake.withdrawal_amount();
            assert!(amount >= low && amount <= high, "{amount}");
            assert!(fake.initial_balance() <= Amount::from_units(10_000));
        }
    }

    #[test]
    fn test_account_type_distribution() {
        let mut fake = FakeData::with_seed(11);
        let mut counts: HashMap<AccountType, usize> = HashMap::new();
        for _ in 0..10_000 {
            *counts.entry(fake.account_type()).or_default() += 1;
        }
        let checking = counts[&AccountType::Checking];
        let joint = counts[&AccountType::Joint];
        assert!((6_500..7_500).contains(&checking), "{checking}");
        assert!((700..1_300).contains(&joint), "{joint}");
    }

    #[test]
    fn test_channel_covers_all_values() {
        let mut fake = FakeData::with_seed(5);
        let mut seen: Vec<Channel> = (0..1_000).map(|_| fake.channel()).collect();
        seen.sort_by_key(|c| c.to_string());
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }
}
