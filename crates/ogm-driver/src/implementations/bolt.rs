//! Bolt driver.
//!
//! Connection settings for the binary Bolt protocol: pool sizing, transport
//! encryption and certificate trust.

use crate::{scheme_validator, Driver, DriverError};
use async_trait::async_trait;
use ogm_config::{Configuration, Credentials, EncryptionLevel, TrustStrategy};
use ogm_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Pool size used when the configuration does not set one.
pub const DEFAULT_POOL_SIZE: u32 = 50;

/// Settings the Bolt driver resolved during `configure`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoltSettings {
	pub uri: String,
	pub credentials: Option<Credentials>,
	pub pool_size: u32,
	pub encryption_level: EncryptionLevel,
	pub trust_strategy: TrustStrategy,
	pub trust_certificate_file: Option<PathBuf>,
}

/// Driver for the Bolt transport.
#[derive(Debug, Default)]
pub struct BoltDriver {
	settings: Option<BoltSettings>,
	closed: AtomicBool,
}

impl BoltDriver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn settings(&self) -> Option<&BoltSettings> {
		self.settings.as_ref()
	}
}

#[async_trait]
impl Driver for BoltDriver {
	fn identifier(&self) -> &str {
		Registry::NAME
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(BoltDriverSchema)
	}

	async fn configure(&mut self, config: &Configuration) -> Result<(), DriverError> {
		if self.is_closed() {
			return Err(DriverError::Closed);
		}
		self.config_schema().validate(&config.to_toml()?)?;

		let uri = config
			.uri()
			.ok_or_else(|| DriverError::Configuration("Bolt driver requires a URI".into()))?;

		// A signed-certificate strategy is useless without the certificate.
		if let Some(path) = &config.trust_certificate_file {
			if tokio::fs::metadata(path).await.is_err() {
				return Err(DriverError::Configuration(format!(
					"Trust certificate file not found: {}",
					path.display()
				)));
			}
		}

		let settings = BoltSettings {
			uri: uri.to_string(),
			credentials: config.credentials.clone(),
			pool_size: config.connection_pool_size.unwrap_or(DEFAULT_POOL_SIZE),
			encryption_level: config
				.encryption_level
				.unwrap_or(EncryptionLevel::Required),
			trust_strategy: config
				.trust_strategy
				.unwrap_or(TrustStrategy::TrustOnFirstUse),
			trust_certificate_file: config.trust_certificate_file.clone(),
		};
		tracing::debug!(
			driver = Registry::NAME,
			uri = %settings.uri,
			pool_size = settings.pool_size,
			encryption = settings.encryption_level.as_str(),
			"Configured"
		);
		self.settings = Some(settings);
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

/// Configuration schema for BoltDriver.
pub struct BoltDriverSchema;

impl ConfigSchema for BoltDriverSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ogm_types::ValidationError> {
		let schema = Schema::new(
			vec![Field::new("uri", FieldType::String).with_validator(scheme_validator(&["bolt"]))],
			vec![
				Field::new(
					"connection_pool_size",
					FieldType::Integer {
						min: Some(1),
						max: Some(10_000),
					},
				),
				Field::new("encryption_level", FieldType::OneOf(&["none", "required"])),
				Field::new(
					"trust_strategy",
					FieldType::OneOf(&["trust_on_first_use", "trust_signed_certificates"]),
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a Bolt driver.
pub fn create_driver() -> Box<dyn Driver> {
	Box::new(BoltDriver::new())
}

/// Registry for the Bolt driver implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "bolt";
	type Factory = crate::DriverFactory;

	fn factory() -> Self::Factory {
		create_driver
	}
}

impl crate::DriverRegistry for Registry {}
