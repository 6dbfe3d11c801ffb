use rust_decimal::Decimal;

use crate::models::Position;
use crate::risk::RiskGate;

/// Step counter driving martingale position sizing
///
/// Logically the step the *next* open will use; distinct from the step
/// recorded on a position that was just closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MartingaleState {
    step: u32,
    max_steps: u32,
}

impl MartingaleState {
    pub fn new(max_steps: u32) -> Self {
        Self { step: 0, max_steps }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn is_capped(&self) -> bool {
        self.step >= self.max_steps
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    /// Never moves past `max_steps`
    pub fn escalate(&mut self) {
        self.step = (self.step + 1).min(self.max_steps);
    }

    /// Apply the outcome of a closed position
    pub fn record_close(&mut self, gate: &RiskGate, pnl: Decimal) {
        if pnl > Decimal::ZERO {
            self.reset();
        } else if gate.should_apply_martingale(self.step, pnl) {
            self.escalate();
        }
    }

    /// Rebuild the next step from persisted positions
    ///
    /// An open position pins the step it was opened with. Otherwise the
    /// most recent close decides: profit resets, a qualifying loss
    /// escalates, anything else keeps the recorded step.
    pub fn restore(
        gate: &RiskGate,
        open: Option<&Position>,
        last_closed: Option<&Position>,
    ) -> Self {
        let mut state = Self::new(gate.max_martingale_steps());

        if let Some(position) = open {
            state.step = position.martingale_step.min(state.max_steps);
            return state;
        }

        if let Some(position) = last_closed {
            state.step = position.martingale_step.min(state.max_steps);
            let pnl = position.realized_pnl.unwrap_or_default();
            state.record_close(gate, pnl);
        }

        state
    }
}
