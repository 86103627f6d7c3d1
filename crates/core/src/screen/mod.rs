pub mod market_state;
pub mod matcher;
pub mod ranker;
pub mod screener;
