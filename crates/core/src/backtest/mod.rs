pub mod engine;
pub mod ledger;
pub mod pattern;
