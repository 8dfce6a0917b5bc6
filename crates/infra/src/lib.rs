//! Infrastructure layer: configuration, Postgres, Redis and in-process read models.

pub mod audit_log;
pub mod config;
pub mod read_model;
