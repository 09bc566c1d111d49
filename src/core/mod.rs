pub mod config;
pub mod lifecycle;
pub mod metrics;
pub mod remote;
pub mod render;
pub mod store;
pub mod terminal;
pub mod workflow;
