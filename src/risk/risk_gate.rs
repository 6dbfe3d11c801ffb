use rust_decimal::Decimal;

use crate::config::RiskConfig;

/// Risk rules for opening and sizing positions
///
/// Holds configuration only; every check is a pure function of its inputs
/// and is re-evaluated on each candidate open.
#[derive(Debug, Clone)]
pub struct RiskGate {
    max_drawdown: Decimal,
    max_martingale_steps: u32,
    martingale_multiplier: Decimal,
    base_fraction: Decimal,
}

impl RiskGate {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            max_drawdown: config.max_drawdown,
            max_martingale_steps: config.max_martingale_steps,
            martingale_multiplier: config.martingale_multiplier,
            base_fraction: config.base_position_fraction,
        }
    }

    pub fn max_martingale_steps(&self) -> u32 {
        self.max_martingale_steps
    }

    /// Fails closed on excessive drawdown or a non-positive balance
    pub fn can_open_position(&self, account_balance: Decimal, current_drawdown: Decimal) -> bool {
        if current_drawdown > self.max_drawdown {
            return false;
        }

        if account_balance <= Decimal::ZERO {
            return false;
        }

        true
    }

    /// Quote amount to commit at `martingale_step`
    ///
    /// `balance * base_fraction * multiplier^step`, or zero once the step
    /// cap is reached (zero means "do not open").
    pub fn calculate_position_size(&self, account_balance: Decimal, martingale_step: u32) -> Decimal {
        if martingale_step >= self.max_martingale_steps {
            return Decimal::ZERO;
        }

        let base_size = account_balance * self.base_fraction;

        let mut multiplier = Decimal::ONE;
        for _ in 0..martingale_step {
            multiplier = match multiplier.checked_mul(self.martingale_multiplier) {
                Some(m) => m,
                None => {
                    tracing::warn!(
                        step = martingale_step,
                        "Martingale multiplier overflowed, refusing to size position"
                    );
                    return Decimal::ZERO;
                }
            };
        }

        base_size.checked_mul(multiplier).unwrap_or(Decimal::ZERO)
    }

    /// Escalate only on a realized loss and only while under the step cap
    pub fn should_apply_martingale(&self, current_step: u32, loss: Decimal) -> bool {
        current_step < self.max_martingale_steps && loss < Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gate() -> RiskGate {
        RiskGate::new(&RiskConfig::default())
    }

    #[test]
    fn test_can_open_position() {
        let gate = gate();

        assert!(gate.can_open_position(dec!(1000), dec!(0)));
        assert!(gate.can_open_position(dec!(1000), dec!(0.20))); // at the limit is allowed
        assert!(!gate.can_open_position(dec!(1000), dec!(0.21)));
        assert!(!gate.can_open_position(dec!(0), dec!(0)));
        assert!(!gate.can_open_position(dec!(-5), dec!(0)));
    }

    #[test]
    fn test_position_size_grows_exponentially() {
        let gate = gate();
        let balance = dec!(1000);

        // 1% base, doubling each step
        assert_eq!(gate.calculate_position_size(balance, 0), dec!(10));
        assert_eq!(gate.calculate_position_size(balance, 1), dec!(20));
        assert_eq!(gate.calculate_position_size(balance, 2), dec!(40));
        assert_eq!(gate.calculate_position_size(balance, 3), dec!(80));
        assert_eq!(gate.calculate_position_size(balance, 4), dec!(160));
    }

    #[test]
    fn test_position_size_zero_at_step_cap() {
        let gate = gate();

        assert_eq!(gate.calculate_position_size(dec!(1000), 5), Decimal::ZERO);
        assert_eq!(gate.calculate_position_size(dec!(1000), 42), Decimal::ZERO);
    }

    #[test]
    fn test_position_size_with_fractional_multiplier() {
        let config = RiskConfig {
            martingale_multiplier: dec!(1.5),
            base_position_fraction: dec!(0.02),
            ..Default::default()
        };
        let gate = RiskGate::new(&config);

        // 500 * 0.02 * 1.5^2
        assert_eq!(gate.calculate_position_size(dec!(500), 2), dec!(22.5));
    }

    #[test]
    fn test_should_apply_martingale() {
        let gate = gate();

        assert!(gate.should_apply_martingale(0, dec!(-0.01)));
        assert!(gate.should_apply_martingale(4, dec!(-100)));
        assert!(!gate.should_apply_martingale(5, dec!(-100)));
        assert!(!gate.should_apply_martingale(0, dec!(0)));
        assert!(!gate.should_apply_martingale(2, dec!(15)));
    }
}
