//! Unit tests for the Money module
//!
//! Focused on what billing relies on: currency rounding, minor-unit
//! conversion for the payment processor, and rate application.

use core_kernel::{Currency, Money, MoneyError, Rate};
use rust_decimal_macros::dec;

mod rounding {
    use super::*;

    #[test]
    fn test_new_rounds_to_four_decimal_places() {
        let m = Money::new(dec!(100.123456789), Currency::BRL);
        assert_eq!(m.amount(), dec!(100.1235));
    }

    #[test]
    fn test_round_to_currency_half_away_from_zero() {
        assert_eq!(Money::new(dec!(0.005), Currency::BRL).round_to_currency().amount(), dec!(0.01));
        assert_eq!(Money::new(dec!(-0.005), Currency::BRL).round_to_currency().amount(), dec!(-0.01));
        assert_eq!(Money::new(dec!(0.004), Currency::BRL).round_to_currency().amount(), dec!(0.00));
    }

    #[test]
    fn test_round_to_currency_jpy() {
        let m = Money::new(dec!(1500.5), Currency::JPY);
        assert_eq!(m.round_to_currency().amount(), dec!(1501));
    }
}

mod minor_units {
    use super::*;

    #[test]
    fn test_from_minor_converts_cents_correctly() {
        let m = Money::from_minor(10050, Currency::BRL);
        assert_eq!(m.amount(), dec!(100.50));
    }

    #[test]
    fn test_to_minor_rounds_first() {
        let m = Money::new(dec!(49.995), Currency::BRL);
        assert_eq!(m.to_minor().unwrap(), 5000);
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_checked_add_same_currency() {
        let a = Money::new(dec!(100.00), Currency::BRL);
        let b = Money::new(dec!(2.33), Currency::BRL);
        assert_eq!(a.checked_add(&b).unwrap().amount(), dec!(102.33));
    }

    #[test]
    fn test_checked_sub_currency_mismatch() {
        let a = Money::new(dec!(100.00), Currency::BRL);
        let b = Money::new(dec!(1.00), Currency::USD);
        assert_eq!(
            a.checked_sub(&b),
            Err(MoneyError::CurrencyMismatch("BRL".to_string(), "USD".to_string()))
        );
    }

    #[test]
    fn test_sum_of_amounts() {
        let amounts = vec![
            Money::new(dec!(50.00), Currency::BRL),
            Money::new(dec!(25.50), Currency::BRL),
        ];
        let total = Money::sum(Currency::BRL, &amounts).unwrap();
        assert_eq!(total.amount(), dec!(75.50));
    }

    #[test]
    fn test_sum_of_nothing_is_zero() {
        let total = Money::sum(Currency::BRL, &[]).unwrap();
        assert!(total.is_zero());
    }
}

mod rate {
    use super::*;

    #[test]
    fn test_daily_interest_rate() {
        let rate = Rate::from_percentage(dec!(0.0333));
        let principal = Money::new(dec!(100.00), Currency::BRL);
        let ten_days = rate.apply(&principal).multiply(dec!(10));
        assert_eq!(ten_days.round_to_currency().amount(), dec!(0.33));
    }

    #[test]
    fn test_rate_display() {
        assert_eq!(Rate::from_percentage(dec!(2.00)).to_string(), "2%");
        assert_eq!(Rate::from_percentage(dec!(0.0333)).to_string(), "0.0333%");
    }

    #[test]
    fn test_zero_rate() {
        assert!(Rate::from_percentage(dec!(0)).is_zero());
    }
}

mod serialization {
    use super::*;

    #[test]
    fn test_money_json_roundtrip() {
        let m = Money::new(dec!(50.00), Currency::BRL);
        let json = serde_json::to_string(&m).unwrap();
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(m, back);
        assert!(json.contains("\"BRL\""));
    }
}
