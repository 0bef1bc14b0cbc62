pub mod autosave;
pub mod handlers;
pub mod routes;
pub mod tracker;

pub use autosave::{AutosaveReport, AutosaveSession, IntervalTicker, ManualTicker, Ticker};
pub use routes::progress_routes;
pub use tracker::{ProgressState, ProgressTracker};
