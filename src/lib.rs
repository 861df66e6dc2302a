pub mod app;
pub mod config;
pub mod dedup;
pub mod error;
pub mod notify;
pub mod window;
