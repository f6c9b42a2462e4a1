pub mod checkpoint;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod regions;
pub mod runner;
