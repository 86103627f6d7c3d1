use chrono::NaiveDate;

/// Closed set of operator intents. The worker parses its CLI into one of
/// these and routes it to the matching component; there is no string-based
/// dispatch anywhere.
#[derive(Debug, Clone)]
pub enum EngineRequest {
    Screen(ScreenRequest),
    Backtest(BacktestRequest),
    Analyze(AnalyzeRequest),
    Report(ReportRequest),
}

#[derive(Debug, Clone)]
pub struct ScreenRequest {
    pub as_of_date: NaiveDate,
    pub top_n: usize,
    pub min_logic_strength: u8,
}

#[derive(Debug, Clone)]
pub struct BacktestRequest {
    pub end_date: NaiveDate,
    pub window_days: usize,
    pub sample_cap: usize,
}

#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    pub window_days: usize,
    pub min_samples: usize,
    pub confidence_samples: usize,
    pub top_k: usize,
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    /// Defaults to the latest persisted watch-list when absent.
    pub as_of_date: Option<NaiveDate>,
}
