pub mod commands;
pub mod config;
pub mod engine;
pub mod github;
pub mod lifecycle;
pub mod pr_status;
pub mod remote;
pub mod store;
pub mod sync;
pub mod terminal;
