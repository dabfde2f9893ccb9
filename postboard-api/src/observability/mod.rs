//! Request metrics, access logging and shipping of access logs to Loki.

pub mod access;
pub mod loki;
pub mod metrics;
