//! Utility nodes
//!
//! Small helpers that reshape values between other stages.

mod unit_amount;

pub use unit_amount::UnitAmountConverterNode;
