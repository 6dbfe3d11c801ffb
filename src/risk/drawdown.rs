use rust_decimal::Decimal;

/// Peak-to-current balance tracker feeding the drawdown gate
#[derive(Debug, Clone, Default)]
pub struct DrawdownTracker {
    peak_balance: Decimal,
    current_balance: Decimal,
}

impl DrawdownTracker {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            peak_balance: initial_balance,
            current_balance: initial_balance,
        }
    }

    /// Record an observed balance and return the resulting drawdown
    pub fn observe(&mut self, balance: Decimal) -> Decimal {
        self.current_balance = balance;
        if balance > self.peak_balance {
            self.peak_balance = balance;
        }
        self.drawdown()
    }

    /// Fractional decline from the peak, zero before any positive balance
    pub fn drawdown(&self) -> Decimal {
        if self.peak_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_balance - self.current_balance) / self.peak_balance).max(Decimal::ZERO)
    }

    pub fn peak_balance(&self) -> Decimal {
        self.peak_balance
    }
}
