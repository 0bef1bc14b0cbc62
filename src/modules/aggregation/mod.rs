pub mod batch;
pub mod handlers;
pub mod routes;
pub mod service;

pub use batch::BatchLoader;
pub use routes::aggregation_routes;
pub use service::{
    AggregationService, AssignmentQuery, AssignmentStats, AssignmentView, DepartmentUserCount,
    TrackProgress, UserAssignment, VideoProgress,
};
