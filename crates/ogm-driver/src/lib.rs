//! Driver module for the OGM.
//!
//! A driver connects the mapping layer to one kind of graph backend. This
//! crate defines the capability every driver offers, the factory signature
//! used to construct drivers by identifier, and the built-in backends.

use async_trait::async_trait;
use ogm_config::{ConfigError, Configuration};
use ogm_types::{ConfigSchema, ImplementationRegistry, ValidationError};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod bolt;
	pub mod embedded;
	pub mod http;
}

/// Errors that can occur while configuring or closing a driver.
#[derive(Debug, Error)]
pub enum DriverError {
	/// The configuration is unusable for this driver.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// The URI is missing a supported scheme or is malformed.
	#[error("Invalid URI '{0}'")]
	InvalidUri(String),
	/// The driver was used after `close`.
	#[error("Driver is closed")]
	Closed,
	/// The backend reported a failure.
	#[error("Backend error: {0}")]
	Backend(String),
}

impl From<ValidationError> for DriverError {
	fn from(err: ValidationError) -> Self {
		DriverError::Configuration(err.to_string())
	}
}

impl From<ConfigError> for DriverError {
	fn from(err: ConfigError) -> Self {
		DriverError::Configuration(err.to_string())
	}
}

/// Capability shared by every driver backend.
///
/// A driver is default-constructed by its factory, configured exactly once,
/// and only then shared. `close` releases its resources and may be called
/// more than once.
#[async_trait]
pub trait Driver: Send + Sync {
	/// Identity compared against the configuration's `driver` field.
	fn identifier(&self) -> &str;

	/// Schema this driver validates its settings against.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Applies `config` to a freshly constructed driver.
	async fn configure(&mut self, config: &Configuration) -> Result<(), DriverError>;

	/// Releases the driver's resources.
	async fn close(&self) -> Result<(), DriverError>;

	fn is_closed(&self) -> bool;
}

/// Type alias for driver factory functions.
///
/// Factories take no arguments; settings arrive through
/// [`Driver::configure`].
pub type DriverFactory = fn() -> Box<dyn Driver>;

/// Registry trait for driver implementations.
pub trait DriverRegistry: ImplementationRegistry<Factory = DriverFactory> {}

/// Returns the (identifier, factory) pair of every built-in driver.
pub fn get_all_implementations() -> Vec<(&'static str, DriverFactory)> {
	use implementations::{bolt, embedded, http};

	vec![
		(bolt::Registry::NAME, bolt::Registry::factory()),
		(embedded::Registry::NAME, embedded::Registry::factory()),
		(http::Registry::NAME, http::Registry::factory()),
	]
}

/// Returns the scheme of `uri`, i.e. the part before `://`.
pub(crate) fn uri_scheme(uri: &str) -> Option<&str> {
	uri.split_once("://")
		.map(|(scheme, _)| scheme)
		.filter(|scheme| !scheme.is_empty())
}

/// Builds a schema validator accepting only URIs with one of `schemes`.
pub(crate) fn scheme_validator(
	schemes: &'static [&'static str],
) -> impl Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static {
	move |value: &toml::Value| {
		let uri = value.as_str().unwrap_or_default();
		match uri_scheme(uri) {
			Some(scheme) if schemes.contains(&scheme) => Ok(()),
			_ => Err(format!(
				"'{}' must use one of the schemes [{}]",
				uri,
				schemes.join(", ")
			)),
		}
	}
}
