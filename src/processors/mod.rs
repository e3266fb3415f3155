//! Clients for the two external payment processors

pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpProcessorGateway, ProcessorChannel};
pub use types::{HealthSnapshot, ProcessorKind, ProcessorStatus};
