pub mod aggregation;
pub mod assessment;
pub mod credentials;
pub mod progress;
