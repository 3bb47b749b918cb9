pub mod client;
pub mod controller;
pub mod planner;

pub use client::HttpViewportClient;
pub use controller::{
    FetchError, FetchPhase, FetchState, ViewportFetchController, ViewportSource,
    DEFAULT_QUIET_PERIOD,
};
pub use planner::{downsample, plan_query, QueryPlan, ViewportPlanner, ViewportResult};
