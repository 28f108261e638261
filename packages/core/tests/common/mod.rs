//! Shared fixtures for integration tests
//!
//! - `MemoryStore` - an in-process `DataStore` with reference filter semantics
//! - `FakeGateway` - a local PostgREST look-alike served by axum
//! - `contract` - scenarios every provider must pass

#![allow(dead_code)]

pub mod contract;
pub mod gateway;
pub mod memory;

use omnistore_core::models::Record;
use serde_json::Value;

#[allow(unused_imports)]
pub use gateway::FakeGateway;
#[allow(unused_imports)]
pub use memory::MemoryStore;

/// Build a record from a `json!` object literal.
pub fn record(value: Value) -> Record {
    value
        .as_object()
        .cloned()
        .expect("test records must be JSON objects")
}
