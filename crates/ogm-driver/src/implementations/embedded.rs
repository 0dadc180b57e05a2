//! Embedded driver.
//!
//! Runs the graph store in-process. With a URI the store lives in that
//! directory (created on demand); without one it is impermanent and vanishes
//! when the driver is closed.

use crate::{uri_scheme, Driver, DriverError};
use async_trait::async_trait;
use ogm_config::Configuration;
use ogm_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Where the embedded store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedStore {
	/// On-disk store rooted at the given directory.
	Permanent(PathBuf),
	/// In-memory store.
	Impermanent,
}

/// Driver for an in-process graph store.
#[derive(Debug, Default)]
pub struct EmbeddedDriver {
	store: Option<EmbeddedStore>,
	closed: AtomicBool,
}

impl EmbeddedDriver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn store(&self) -> Option<&EmbeddedStore> {
		self.store.as_ref()
	}
}

/// Maps `file:///path` and bare paths to a directory.
fn store_path(uri: &str) -> Result<PathBuf, DriverError> {
	match uri_scheme(uri) {
		None => Ok(PathBuf::from(uri)),
		Some("file") => {
			let path = &uri["file://".len()..];
			if path.is_empty() {
				return Err(DriverError::InvalidUri(uri.to_string()));
			}
			Ok(PathBuf::from(path))
		},
		Some(_) => Err(DriverError::InvalidUri(uri.to_string())),
	}
}

#[async_trait]
impl Driver for EmbeddedDriver {
	fn identifier(&self) -> &str {
		Registry::NAME
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EmbeddedDriverSchema)
	}

	async fn configure(&mut self, config: &Configuration) -> Result<(), DriverError> {
		if self.is_closed() {
			return Err(DriverError::Closed);
		}
		self.config_schema().validate(&config.to_toml()?)?;

		let store = match config.uri() {
			Some(uri) => {
				let path = store_path(uri)?;
				tokio::fs::create_dir_all(&path).await.map_err(|e| {
					DriverError::Backend(format!(
						"Cannot create store directory {}: {}",
						path.display(),
						e
					))
				})?;
				EmbeddedStore::Permanent(path)
			},
			None => EmbeddedStore::Impermanent,
		};

		tracing::debug!(driver = Registry::NAME, store = ?store, "Configured");
		self.store = Some(store);
		Ok(())
	}

	async fn close(&self) -> Result<(), DriverError> {
		if !self.closed.swap(true, Ordering::AcqRel) {
			tracing::debug!(driver = Registry::NAME, "Closed");
		}
		Ok(())
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}
}

/// Configuration schema for EmbeddedDriver.
pub struct EmbeddedDriverSchema;

impl ConfigSchema for EmbeddedDriverSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ogm_types::ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("uri", FieldType::String).with_validator(|value| {
					let uri = value.as_str().unwrap_or_default();
					store_path(uri).map(|_| ()).map_err(|e| e.to_string())
				}),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an embedded driver.
pub fn create_driver() -> Box<dyn Driver> {
	Box::new(EmbeddedDriver::new())
}

/// Registry for the embedded driver implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "embedded";
	type Factory = crate::DriverFactory;

	fn factory() -> Self::Factory {
		create_driver
	}
}

impl crate::DriverRegistry for Registry {}

impl EmbeddedStore {
	pub fn path(&self) -> Option<&Path> {
		match self {
			EmbeddedStore::Permanent(path) => Some(path),
			EmbeddedStore::Impermanent => None,
		}
	}
}
