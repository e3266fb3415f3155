//! Payment intake broker.
//!
//! Accepts payment requests, forwards each one to exactly one of two
//! external payment processors (preferring the cheaper default while it is
//! healthy), and serves an aggregated summary of accepted payments. Work
//! that cannot be delivered synchronously flows through a Redis-backed
//! queue with exponential backoff; accepted payments land in a Postgres
//! ledger keyed on the client-supplied correlation id.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod processors;
pub mod queue;
pub mod services;
pub mod workers;
