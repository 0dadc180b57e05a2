//! Core driver registry for the OGM.
//!
//! [`Components`] owns the single active driver and the configuration it was
//! built from. Drivers are resolved lazily by identifier through
//! [`DriverFactories`]; when no identifier is configured the registry first
//! auto-configures itself from a named configuration source.

pub mod components;
pub mod factory;

pub use components::{builder::ComponentsBuilder, Components};
pub use factory::DriverFactories;

use ogm_config::ConfigError;
use ogm_driver::DriverError;
use thiserror::Error;

/// Errors surfaced by the driver registry.
#[derive(Debug, Error)]
pub enum ComponentsError {
	/// No driver was configured and loading the auto-configuration source
	/// failed.
	#[error("Auto-configuration from '{source_name}' failed: {source}")]
	AutoConfiguration {
		source_name: String,
		#[source]
		source: ConfigError,
	},
	/// The configuration (after auto-configuration) names no driver.
	#[error("No driver configured")]
	MissingDriver,
	/// The driver identifier has no registered factory.
	#[error("Unknown driver '{name}'. Available: [{available}]")]
	UnknownDriver { name: String, available: String },
	/// The driver was created but rejected the configuration.
	#[error("Could not load driver '{name}': {source}")]
	DriverConfiguration {
		name: String,
		#[source]
		source: DriverError,
	},
	#[error(transparent)]
	Config(#[from] ConfigError),
}

impl ComponentsError {
	/// True for failures while turning the configuration into a live driver.
	pub fn is_resolution_failure(&self) -> bool {
		matches!(
			self,
			ComponentsError::AutoConfiguration { .. }
				| ComponentsError::MissingDriver
				| ComponentsError::UnknownDriver { .. }
				| ComponentsError::DriverConfiguration { .. }
		)
	}
}
