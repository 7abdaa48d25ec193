pub mod action;
pub mod config;
pub mod format;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod scheduler;
pub mod system;
