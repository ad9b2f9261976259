pub mod config;
pub mod error;
pub mod lifecycle;
pub mod plugin;
pub mod report;
pub mod scheduler;
pub mod storage;
pub mod terminal;
