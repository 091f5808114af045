//! Operator commands run against a live naming service

pub mod client;
pub mod repair;
pub mod verify;

pub use client::NamingClient;
pub use repair::{repair_cluster, RepairReport};
pub use verify::{verify_cluster, VerifyReport};
