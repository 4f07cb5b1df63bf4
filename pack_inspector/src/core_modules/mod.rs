pub mod aggregator;
pub mod baseline;
pub mod classifier;
pub mod event_log;
pub mod hsv;
pub mod roi;
pub mod state;
