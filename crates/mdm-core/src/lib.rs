pub mod config;
pub mod logging;

pub mod checksum;
pub mod control;
pub mod error;
pub mod fetcher;
pub mod manifest;
pub mod merge;
pub mod mux;
pub mod naming;
pub mod orchestrator;
pub mod planner;
pub mod probe;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod task;
pub mod transfer;
