pub mod accounts;
pub mod config;
pub mod error;
pub mod job;
pub mod local;
pub mod queue;
pub mod shutdown;
pub mod status;
pub mod storage;
pub mod store;
pub mod worker;
