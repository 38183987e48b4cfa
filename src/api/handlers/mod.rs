pub mod control;
pub mod diagnostics;
pub mod health;
pub mod metrics;
