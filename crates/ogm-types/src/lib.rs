//! Shared types for the OGM driver layer.
//!
//! This crate holds the small set of types that every other crate in the
//! workspace agrees on: the self-registration contract for pluggable
//! implementations, the schema machinery drivers use to check their
//! settings, and a redacting string wrapper for credentials.

/// Self-registration contract for pluggable implementations.
pub mod registry;
/// Redacting wrapper for passwords and other secrets.
pub mod secret_string;
/// Schema-based validation of TOML setting tables.
pub mod validation;

pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use validation::{ConfigSchema, Field, FieldType, FieldValidator, Schema, ValidationError};
