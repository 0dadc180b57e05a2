//! Configuration module for the OGM driver layer.
//!
//! A [`Configuration`] names the driver implementation to use and carries the
//! connection settings handed to that driver. Configurations can be built in
//! code, parsed from TOML, or loaded by name from a [`ConfigurationSource`]
//! which understands both TOML files and Java-style `.properties` files.
//!
//! ## Modular Configuration Support
//!
//! TOML files may pull in other files with `include = ["a.toml", "b.toml"]`.
//! Each top-level key must be defined by exactly one file.

mod loader;
mod source;

pub use loader::{parse_properties, ConfigLoader};
pub use source::{
	resolve_source_name, ConfigurationSource, FileSource, PropertyLookup, SystemProperties,
	CONFIG_SOURCE_ENV_VAR, CONFIG_SOURCE_PROPERTY, DEFAULT_CONFIG_SOURCE,
};

use ogm_types::SecretString;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while building or loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
	/// No source with the given name exists on any search path.
	#[error("Configuration source not found: {0}")]
	SourceNotFound(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message only; the full error echoes the whole input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Username and password presented to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
	pub username: String,
	pub password: SecretString,
}

impl Credentials {
	pub fn new(username: impl Into<String>, password: impl Into<SecretString>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
		}
	}
}

/// Transport encryption requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionLevel {
	None,
	Required,
}

impl EncryptionLevel {
	pub fn as_str(&self) -> &'static str {
		match self {
			EncryptionLevel::None => "none",
			EncryptionLevel::Required => "required",
		}
	}
}

impl FromStr for EncryptionLevel {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"none" => Ok(EncryptionLevel::None),
			"required" => Ok(EncryptionLevel::Required),
			other => Err(ConfigError::Parse(format!(
				"Unknown encryption level '{}'",
				other
			))),
		}
	}
}

/// How server certificates are trusted when encryption is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStrategy {
	TrustOnFirstUse,
	TrustSignedCertificates,
}

impl TrustStrategy {
	pub fn as_str(&self) -> &'static str {
		match self {
			TrustStrategy::TrustOnFirstUse => "trust_on_first_use",
			TrustStrategy::TrustSignedCertificates => "trust_signed_certificates",
		}
	}
}

impl FromStr for TrustStrategy {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"trust_on_first_use" => Ok(TrustStrategy::TrustOnFirstUse),
			"trust_signed_certificates" => Ok(TrustStrategy::TrustSignedCertificates),
			other => Err(ConfigError::Parse(format!(
				"Unknown trust strategy '{}'",
				other
			))),
		}
	}
}

/// Driver selection plus connection settings.
///
/// An empty configuration (the `Default`) has no driver identifier, which is
/// what triggers auto-configuration when a driver is first requested.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Configuration {
	/// Identifier of the driver implementation, e.g. "http".
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub driver: Option<String>,
	/// Location of the backend.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub uri: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub credentials: Option<Credentials>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connection_pool_size: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub encryption_level: Option<EncryptionLevel>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub trust_strategy: Option<TrustStrategy>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub trust_certificate_file: Option<PathBuf>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connection_timeout_seconds: Option<u64>,
	/// Backend-specific settings with no dedicated field.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub settings: BTreeMap<String, String>,
}

impl Configuration {
	/// Creates an empty configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style variant of [`Configuration::set_driver`].
	pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
		self.set_driver(driver);
		self
	}

	/// Builder-style variant of [`Configuration::set_uri`].
	pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
		self.set_uri(uri);
		self
	}

	pub fn set_driver(&mut self, driver: impl Into<String>) {
		self.driver = Some(driver.into());
	}

	pub fn driver(&self) -> Option<&str> {
		self.driver.as_deref()
	}

	pub fn set_uri(&mut self, uri: impl Into<String>) {
		self.uri = Some(uri.into());
	}

	pub fn uri(&self) -> Option<&str> {
		self.uri.as_deref()
	}

	pub fn set_credentials(&mut self, username: impl Into<String>, password: impl Into<SecretString>) {
		self.credentials = Some(Credentials::new(username, password));
	}

	/// Resets every field, leaving an empty configuration.
	pub fn clear(&mut self) {
		*self = Self::default();
	}

	pub fn get_setting(&self, key: &str) -> Option<&str> {
		self.settings.get(key).map(String::as_str)
	}

	/// Applies a single property using the `.properties` key names.
	///
	/// Well-known keys (`driver`, `URI`, `username`, `password`,
	/// `connection.pool.size`, `encryption.level`, `trust.strategy`,
	/// `trust.certificate.file`, `connection.timeout`) populate the typed
	/// fields; every other key is stored in `settings`. Empty values are
	/// ignored.
	pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
		let value = value.trim();
		if value.is_empty() {
			return Ok(());
		}

		match key {
			"driver" => self.set_driver(value),
			"URI" | "uri" => self.set_uri(value),
			"username" => {
				self.credentials.get_or_insert_with(Credentials::default).username =
					value.to_string();
			},
			"password" => {
				self.credentials.get_or_insert_with(Credentials::default).password =
					SecretString::from(value);
			},
			"connection.pool.size" => {
				self.connection_pool_size = Some(parse_number(key, value)?);
			},
			"encryption.level" => self.encryption_level = Some(value.parse()?),
			"trust.strategy" => self.trust_strategy = Some(value.parse()?),
			"trust.certificate.file" => {
				let path = value.strip_prefix("file://").unwrap_or(value);
				self.trust_certificate_file = Some(PathBuf::from(path));
			},
			"connection.timeout" => {
				self.connection_timeout_seconds = Some(parse_number(key, value)?);
			},
			_ => {
				self.settings.insert(key.to_string(), value.to_string());
			},
		}
		Ok(())
	}

	/// Builds a configuration from `.properties` style key/value pairs and
	/// validates it.
	pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: AsRef<str>,
	{
		let mut config = Configuration::new();
		for (key, value) in properties {
			config.set(key.as_ref(), value.as_ref())?;
		}
		config.validate()?;
		Ok(config)
	}

	/// Returns the configuration as a TOML table, the shape driver schemas
	/// validate. Secrets are redacted.
	pub fn to_toml(&self) -> Result<toml::Value, ConfigError> {
		toml::Value::try_from(self)
			.map_err(|e| ConfigError::Parse(format!("Failed to convert configuration: {}", e)))
	}

	/// Checks settings that are invalid for every driver.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if let Some(driver) = &self.driver {
			if driver.trim().is_empty() {
				return Err(ConfigError::Validation(
					"Driver identifier cannot be empty".into(),
				));
			}
		}
		if let Some(uri) = &self.uri {
			if uri.trim().is_empty() {
				return Err(ConfigError::Validation("URI cannot be empty".into()));
			}
		}
		if let Some(credentials) = &self.credentials {
			if credentials.username.is_empty() {
				return Err(ConfigError::Validation(
					"Credentials require a username".into(),
				));
			}
		}
		if self.connection_pool_size == Some(0) {
			return Err(ConfigError::Validation(
				"connection.pool.size must be at least 1".into(),
			));
		}
		if self.trust_certificate_file.is_some()
			&& self.trust_strategy != Some(TrustStrategy::TrustSignedCertificates)
		{
			return Err(ConfigError::Validation(
				"trust.certificate.file requires trust.strategy = trust_signed_certificates".into(),
			));
		}
		Ok(())
	}
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
	value
		.parse()
		.map_err(|_| ConfigError::Parse(format!("'{}' expects a number, got '{}'", key, value)))
}

/// Parses a TOML document into a validated configuration.
///
/// `${VAR}` references are resolved first.
impl FromStr for Configuration {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Configuration = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

/// Replaces `${VAR_NAME}` with the value of `VAR_NAME`, or with the
/// fallback in `${VAR_NAME:-fallback}` when the variable is unset.
///
/// Input is capped at 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(var_name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name.as_str()
					)))
				},
			},
		};
		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}
