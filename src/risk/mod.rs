// Risk management module
pub mod drawdown;
pub mod risk_gate;

pub use drawdown::DrawdownTracker;
pub use risk_gate::RiskGate;
