pub mod event;
pub mod logic;
pub mod market;
pub mod report;
pub mod request;
pub mod watchlist;
