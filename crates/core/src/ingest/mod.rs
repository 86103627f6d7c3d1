pub mod provider;
pub mod rate_limit;
pub mod types;
