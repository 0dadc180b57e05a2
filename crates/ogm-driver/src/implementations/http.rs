//! HTTP driver.
//!
//! Talks to a graph server over its transactional HTTP endpoint. Only the
//! connection settings live here; request handling belongs to the query layer.

use crate::{scheme_validator, Driver, DriverError};
use async_trait::async_trait;
use ogm_config::{Configuration, Credentials};
use ogm_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Request timeout used when the configuration does not set one.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings the HTTP driver resolved during `configure`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
	pub uri: String,
	pub credentials: Option<Credentials>,
	pub timeout: Duration,
}

/// Driver for the HTTP transport.
#[derive(Debug, Default)]
pub struct HttpDriver {
	settings: Option<HttpSettings>,
	closed: AtomicBool,
}

impl HttpDriver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the resolved settings, or `None` before `configure`.
	pub fn settings(&self) -> Option<&HttpSettings> {
		self.settings.as_ref()
	}
}

#[async_trait]
impl Driver for HttpDriver {
	fn identifier(&self) -> &str {
		Registry::NAME
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpDriverSchema)
	}

	async fn configure(&mut self, config: &Configuration) -> Result<(), DriverError> {
		if self.is_closed() {
			return Err(DriverError::Closed);
		}
		self.config_schema().validate(&config.to_toml()?)?;

		let uri = config
			.uri()
			.ok_or_else(|| DriverError::Configuration("HTTP driver requires a URI".into()))?;
		let timeout = config
			.connection_timeout_seconds
			.map(Duration::from_secs)
			.unwrap_or(DEFAULT_CONNECTION_TIMEOUT);

		tracing::debug!(driver = Registry::NAME, uri = %uri, "Configured");
		self.settings = Some(HttpSettings {
			uri: uri.trim_end_matches('/').to_string(),
			credentials: config.credentials.clone(),
			timeout,
		});
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

/// Configuration schema for HttpDriver.
pub struct HttpDriverSchema;

impl ConfigSchema for HttpDriverSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ogm_types::ValidationError> {
		let schema = Schema::new(
			vec![Field::new("uri", FieldType::String)
				.with_validator(scheme_validator(&["http", "https"]))],
			vec![Field::new(
				"connection_timeout_seconds",
				FieldType::Integer {
					min: Some(1),
					max: Some(3600),
				},
			)],
		);
		schema.validate(config)
	}
}

/// Factory function to create an HTTP driver.
pub fn create_driver() -> Box<dyn Driver> {
	Box::new(HttpDriver::new())
}

/// Registry for the HTTP driver implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = crate::DriverFactory;

	fn factory() -> Self::Factory {
		create_driver
	}
}

impl crate::DriverRegistry for Registry {}
