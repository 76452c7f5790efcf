//! Avatar generation REST API contract types and validation
//!
//! This crate defines the schema types exchanged with the avatar computation
//! service. They are shared between the REST client, the scripted mock client
//! and the orchestration core.

pub mod error;
pub mod types;
pub mod validation;

pub use error::*;
pub use types::*;
