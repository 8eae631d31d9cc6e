//! Numeric kernel for consensus arithmetic.
//!
//! Every amount that reaches the state is a [`Coin`]: an arbitrary-precision
//! count of wei (1 DNA = 10^18 wei) backed by [`malachite::Natural`]. Reward
//! maths mixes exact integer arithmetic with IEEE-754 stake weights; the float
//! values never touch an amount directly. Instead [`mul_div_f32`] and
//! [`mul_div_f64`] decompose each float into `mantissa * 2^exp` and perform
//! the scaling as big-integer multiply/shift/floor-divide, so two nodes agree
//! on every wei regardless of their libm.

use std::cmp::Ordering;
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use malachite::Natural;
use malachite::base::num::arithmetic::traits::Pow;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ConsensusConf;

/// Number of wei in one DNA.
pub const DNA_DECIMALS: u32 = 18;

fn dna_base() -> Natural {
    Natural::from(10u32).pow(DNA_DECIMALS as u64)
}

/// Unsigned fixed-point amount with 18 decimals.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Coin {
    wei: Natural,
}

impl Default for Coin {
    fn default() -> Self {
        Self::zero()
    }
}

impl Coin {
    pub fn zero() -> Self {
        Self {
            wei: Natural::from(0u32),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.wei == Natural::from(0u32)
    }

    pub fn from_wei(wei: u128) -> Self {
        Self {
            wei: Natural::from(wei),
        }
    }

    pub fn from_natural(wei: Natural) -> Self {
        Self { wei }
    }

    pub fn from_dna(dna: u64) -> Self {
        Self {
            wei: Natural::from(dna) * dna_base(),
        }
    }

    /// Parses a decimal DNA amount, e.g. `"25.142894105976233042"`.
    /// At most 18 fractional digits are accepted.
    pub fn from_dna_str(value: &str) -> Option<Self> {
        let (int_part, frac_part) = match value.split_once('.') {
            Some((i, f)) => (i, f),
            None => (value, ""),
        };
        if frac_part.len() > DNA_DECIMALS as usize {
            return None;
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        let int = if int_part.is_empty() {
            Natural::from(0u32)
        } else {
            Natural::from_str(int_part).ok()?
        };
        let mut frac = Natural::from(0u32);
        if !frac_part.is_empty() {
            frac = Natural::from_str(frac_part).ok()?;
            let missing = DNA_DECIMALS as usize - frac_part.len();
            frac *= Natural::from(10u32).pow(missing as u64);
        }
        Some(Self {
            wei: int * dna_base() + frac,
        })
    }

    pub fn as_natural(&self) -> &Natural {
        &self.wei
    }

    pub fn wei_string(&self) -> String {
        self.wei.to_string()
    }

    pub fn add_assign(&mut self, other: &Coin) {
        self.wei.add_assign(other.wei.clone());
    }

    pub fn checked_sub(&self, other: &Coin) -> Option<Coin> {
        if self.wei >= other.wei {
            Some(Coin {
                wei: self.wei.clone() - other.wei.clone(),
            })
        } else {
            None
        }
    }

    pub fn saturating_sub(&self, other: &Coin) -> Coin {
        self.checked_sub(other).unwrap_or_else(Coin::zero)
    }

    pub fn add(&self, other: &Coin) -> Coin {
        Coin {
            wei: self.wei.clone() + other.wei.clone(),
        }
    }

    pub fn mul_u64(&self, factor: u64) -> Coin {
        Coin {
            wei: self.wei.clone() * Natural::from(factor),
        }
    }

    pub fn div_u64(&self, divisor: u64) -> Coin {
        debug_assert!(divisor != 0);
        Coin {
            wei: self.wei.clone() / Natural::from(divisor),
        }
    }

    /// Converts to a DNA amount as an IEEE-754 double. The digit fold runs in
    /// a fixed order, so the result is identical on every node.
    pub fn to_dna_f64(&self) -> f64 {
        let mut acc = 0f64;
        for byte in self.wei.to_string().bytes() {
            acc = acc * 10.0 + f64::from(byte - b'0');
        }
        acc / 1e18
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = dna_base();
        let int = self.wei.clone() / base.clone();
        let frac = self.wei.clone() % base;
        if frac == Natural::from(0u32) {
            return write!(f, "{int}");
        }
        let frac = format!("{:0>18}", frac.to_string());
        write!(f, "{}.{}", int, frac.trim_end_matches('0'))
    }
}

impl Serialize for Coin {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.wei.to_string())
    }
}

impl<'de> Deserialize<'de> for Coin {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Natural::from_str(&value)
            .map(Coin::from_natural)
            .map_err(|_| serde::de::Error::custom("invalid coin value"))
    }
}

/// `base * pct / 100`, exact with truncation.
pub fn percent(base: &Coin, pct: u32) -> Coin {
    Coin {
        wei: base.wei.clone() * Natural::from(pct) / Natural::from(100u32),
    }
}

fn decompose_f64(value: f64) -> (u64, i32) {
    let bits = value.to_bits();
    let raw_exp = ((bits >> 52) & 0x7ff) as i32;
    let frac = bits & 0x000f_ffff_ffff_ffff;
    if raw_exp == 0 {
        (frac, -1074)
    } else {
        (frac | (1u64 << 52), raw_exp - 1075)
    }
}

fn decompose_f32(value: f32) -> (u64, i32) {
    let bits = value.to_bits();
    let raw_exp = ((bits >> 23) & 0xff) as i32;
    let frac = u64::from(bits & 0x007f_ffff);
    if raw_exp == 0 {
        (frac, -149)
    } else {
        (frac | (1u64 << 23), raw_exp - 150)
    }
}

fn mul_div_decomposed(amount: &Coin, num: (u64, i32), den: (u64, i32)) -> Coin {
    let (num_m, num_e) = num;
    let (den_m, den_e) = den;
    if num_m == 0 || den_m == 0 {
        return Coin::zero();
    }
    let scaled = amount.wei.clone() * Natural::from(num_m);
    let shift = num_e - den_e;
    let wei = if shift >= 0 {
        (scaled << (shift as u64)) / Natural::from(den_m)
    } else {
        scaled / (Natural::from(den_m) << ((-shift) as u64))
    };
    Coin { wei }
}

/// Scales `amount` by the exact rational value of `num / den`, truncating
/// toward zero. Both weights must be finite and non-negative.
pub fn mul_div_f32(amount: &Coin, num: f32, den: f32) -> Coin {
    if !num.is_finite() || !den.is_finite() || num <= 0.0 || den <= 0.0 {
        return Coin::zero();
    }
    mul_div_decomposed(amount, decompose_f32(num), decompose_f32(den))
}

/// See [`mul_div_f32`]; double-precision variant used by per-block rewards.
pub fn mul_div_f64(amount: &Coin, num: f64, den: f64) -> Coin {
    if !num.is_finite() || !den.is_finite() || num <= 0.0 || den <= 0.0 {
        return Coin::zero();
    }
    mul_div_decomposed(amount, decompose_f64(num), decompose_f64(den))
}

/// Epoch-reward stake weight. The f32 cast is part of consensus.
pub fn stake_weight(stake: &Coin) -> f32 {
    stake.to_dna_f64().powf(0.9) as f32
}

/// Per-block reward weight: zero stake earns nothing, any positive stake
/// weighs at least one.
pub fn block_weight(stake: &Coin) -> f64 {
    if stake.is_zero() {
        return 0.0;
    }
    stake.to_dna_f64().powf(0.9).max(1.0)
}

/// Splits a reward into its balance and stake parts. Newbies keep most of the
/// payout locked as stake.
pub fn split_reward(total: &Coin, is_newbie: bool, conf: &ConsensusConf) -> (Coin, Coin) {
    let rate = if is_newbie {
        conf.stake_reward_rate_newbie_percent
    } else {
        conf.stake_reward_rate_percent
    };
    let stake = percent(total, rate);
    let balance = total.saturating_sub(&stake);
    (balance, stake)
}

/// Outcome of filtering a payment through an identity's penalty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PenaltyCharge {
    /// Balance part that may actually be paid out.
    pub payable_balance: Coin,
    /// Stake part that may actually be paid out.
    pub payable_stake: Coin,
    /// Coins consumed by a legacy coin-denominated penalty.
    pub charged_penalty: Option<Coin>,
    /// Seconds consumed from a time-denominated penalty.
    pub charged_seconds: u16,
}

/// Applies an outstanding penalty to a pending payment.
///
/// Legacy coin penalties eat the balance part first, then the stake part, and
/// clamp at whatever was available. Time penalties withhold the whole payment
/// while they run; the charge is the wall-clock elapsed between the previous
/// penalty timestamp and `new_ts`, capped at the remaining seconds. A zero or
/// backwards clock charges nothing.
pub fn calculate_penalty(
    balance: Coin,
    stake: Coin,
    penalty: Option<Coin>,
    penalty_seconds: u16,
    prev_ts: i64,
    new_ts: i64,
) -> PenaltyCharge {
    if let Some(penalty) = penalty {
        let available = balance.add(&stake);
        if available.cmp(&penalty) != Ordering::Greater {
            return PenaltyCharge {
                payable_balance: Coin::zero(),
                payable_stake: Coin::zero(),
                charged_penalty: Some(available),
                charged_seconds: 0,
            };
        }
        if balance >= penalty {
            return PenaltyCharge {
                payable_balance: balance.saturating_sub(&penalty),
                payable_stake: stake,
                charged_penalty: Some(penalty),
                charged_seconds: 0,
            };
        }
        let rest = penalty.saturating_sub(&balance);
        return PenaltyCharge {
            payable_balance: Coin::zero(),
            payable_stake: stake.saturating_sub(&rest),
            charged_penalty: Some(penalty),
            charged_seconds: 0,
        };
    }

    if penalty_seconds == 0 {
        return PenaltyCharge {
            payable_balance: balance,
            payable_stake: stake,
            charged_penalty: None,
            charged_seconds: 0,
        };
    }

    let charged_seconds = if prev_ts == 0 || new_ts <= prev_ts {
        0
    } else {
        let elapsed = (new_ts - prev_ts).min(i64::from(penalty_seconds)) as u16;
        elapsed
    };
    PenaltyCharge {
        payable_balance: Coin::zero(),
        payable_stake: Coin::zero(),
        charged_penalty: None,
        charged_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConf;

    fn coin(wei: u128) -> Coin {
        Coin::from_wei(wei)
    }

    #[test]
    fn parses_and_prints_decimal_amounts() {
        let cases = [
            ("0.0005", 500_000_000_000_000u128),
            ("10", 10_000_000_000_000_000_000),
            ("25.142894105976233042", 25_142_894_105_976_233_042),
            ("0.571576423904932169", 571_576_423_904_932_169),
        ];
        for (text, wei) in cases {
            let parsed = Coin::from_dna_str(text).unwrap();
            assert_eq!(parsed, coin(wei));
            assert_eq!(parsed.to_string(), text);
        }
        assert!(Coin::from_dna_str("1.0000000000000000001").is_none());
        assert!(Coin::from_dna_str("").is_none());
    }

    #[test]
    fn percent_truncates() {
        assert_eq!(percent(&coin(1000), 90), coin(900));
        assert_eq!(percent(&coin(101), 50), coin(50));
    }

    #[test]
    fn split_reward_keeps_ratio() {
        let conf = ConsensusConf::default();
        let (balance, stake) = split_reward(&Coin::from_dna(110), false, &conf);
        assert_eq!(balance, Coin::from_dna(88));
        assert_eq!(stake, Coin::from_dna(22));

        let (balance, stake) = split_reward(&Coin::from_dna(10), true, &conf);
        assert_eq!(balance, Coin::from_dna(2));
        assert_eq!(stake, Coin::from_dna(8));
    }

    #[test]
    fn mul_div_with_equal_weights_is_identity() {
        let amount = Coin::from_dna_str("123.456789012345678901").unwrap();
        let weight = 7.943282347f32;
        assert_eq!(mul_div_f32(&amount, weight, weight), amount);
        assert_eq!(mul_div_f64(&amount, 63.09573445, 63.09573445), amount);
    }

    #[test]
    fn mul_div_by_power_of_two_is_exact() {
        let amount = Coin::from_dna(6);
        assert_eq!(mul_div_f64(&amount, 1.0, 2.0), Coin::from_dna(3));
        assert_eq!(
            mul_div_f32(&amount, 0.25, 1.0),
            Coin::from_dna_str("1.5").unwrap()
        );
    }

    #[test]
    fn mul_div_rejects_degenerate_weights() {
        let amount = Coin::from_dna(1);
        assert!(mul_div_f32(&amount, 0.0, 1.0).is_zero());
        assert!(mul_div_f32(&amount, 1.0, 0.0).is_zero());
        assert!(mul_div_f64(&amount, f64::NAN, 1.0).is_zero());
    }

    #[test]
    fn stake_weight_matches_power_curve() {
        let weight = stake_weight(&Coin::from_dna(1));
        assert_eq!(weight, 1.0);
        let weight = stake_weight(&Coin::from_dna(2));
        assert!((f64::from(weight) - 2f64.powf(0.9)).abs() < 1e-6);
        assert_eq!(block_weight(&Coin::zero()), 0.0);
        assert_eq!(block_weight(&Coin::from_dna_str("0.0005").unwrap()), 1.0);
    }

    #[test]
    fn coin_penalty_consumes_balance_then_stake() {
        let cases = [
            // (balance, stake, penalty) -> (payable balance, payable stake, charged)
            ((1000u128, 500u128, 900u128), (100u128, 500u128, 900u128)),
            ((1000, 500, 1200), (0, 300, 1200)),
            ((1000, 500, 1800), (0, 0, 1500)),
            ((1000, 500, 1500), (0, 0, 1500)),
            ((1000, 500, 2600), (0, 0, 1500)),
        ];
        for ((balance, stake, penalty), (eb, es, ec)) in cases {
            let charge =
                calculate_penalty(coin(balance), coin(stake), Some(coin(penalty)), 0, 0, 0);
            assert_eq!(charge.payable_balance, coin(eb));
            assert_eq!(charge.payable_stake, coin(es));
            assert_eq!(charge.charged_penalty, Some(coin(ec)));
            assert_eq!(charge.charged_seconds, 0);
        }
        let charge = calculate_penalty(coin(1000), coin(500), None, 0, 0, 0);
        assert_eq!(charge.payable_balance, coin(1000));
        assert_eq!(charge.payable_stake, coin(500));
        assert_eq!(charge.charged_penalty, None);
    }

    #[test]
    fn seconds_penalty_withholds_payment() {
        // No penalty at all: payment passes through.
        let charge = calculate_penalty(coin(1), coin(2), None, 0, 30, 60);
        assert_eq!(charge.payable_balance, coin(1));
        assert_eq!(charge.payable_stake, coin(2));
        assert_eq!(charge.charged_seconds, 0);

        // Running penalty: payment withheld, elapsed time charged.
        let charge = calculate_penalty(coin(1), coin(2), None, 10, 30, 60);
        assert!(charge.payable_balance.is_zero());
        assert!(charge.payable_stake.is_zero());
        assert_eq!(charge.charged_seconds, 10);

        let charge = calculate_penalty(coin(1), coin(2), None, 10, 30, 34);
        assert_eq!(charge.charged_seconds, 4);

        // Clock never started or went backwards: nothing charged.
        let charge = calculate_penalty(coin(1), coin(2), None, 10, 0, 34);
        assert_eq!(charge.charged_seconds, 0);
        let charge = calculate_penalty(coin(1), coin(2), None, 10, 44, 34);
        assert_eq!(charge.charged_seconds, 0);
    }
}
