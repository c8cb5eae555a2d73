//! The durable scheduler: worker tuning (`config`) and the claim/execute/
//! commit loop itself (`worker`).

pub mod config;
pub mod worker;

pub use config::RunnerConfig;
pub use worker::Worker;
