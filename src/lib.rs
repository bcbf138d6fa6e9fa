pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod extract;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod portfolio;
pub mod reflection;
pub mod storage;
pub mod store;
pub mod taxonomy;
pub mod trust;
pub mod venue;
pub mod worldview;
