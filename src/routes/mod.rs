pub mod browse;
pub mod chat;
pub mod health;
pub mod log;
pub mod metrics;
pub mod models;
pub mod queue;
