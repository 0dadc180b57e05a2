//! Builder for [`Components`].

use super::{Components, State};
use crate::factory::DriverFactories;
use ogm_config::{Configuration, ConfigurationSource, FileSource, PropertyLookup, SystemProperties};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Assembles a [`Components`] registry from its collaborators.
///
/// Anything left unset falls back to the built-in drivers, a
/// [`FileSource`] over the working directory, [`SystemProperties`] and an
/// empty configuration.
#[derive(Default)]
pub struct ComponentsBuilder {
	factories: Option<DriverFactories>,
	source: Option<Arc<dyn ConfigurationSource>>,
	properties: Option<Arc<dyn PropertyLookup>>,
	configuration: Configuration,
}

impl ComponentsBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_factories(mut self, factories: DriverFactories) -> Self {
		self.factories = Some(factories);
		self
	}

	pub fn with_source(mut self, source: Arc<dyn ConfigurationSource>) -> Self {
		self.source = Some(source);
		self
	}

	pub fn with_properties(mut self, properties: Arc<dyn PropertyLookup>) -> Self {
		self.properties = Some(properties);
		self
	}

	/// Sets the initial configuration. No driver is created until one is
	/// requested.
	pub fn with_configuration(mut self, configuration: Configuration) -> Self {
		self.configuration = configuration;
		self
	}

	pub fn build(self) -> Components {
		Components {
			factories: self.factories.unwrap_or_else(DriverFactories::with_defaults),
			source: self
				.source
				.unwrap_or_else(|| Arc::new(FileSource::current_dir())),
			properties: self
				.properties
				.unwrap_or_else(|| Arc::new(SystemProperties::new())),
			state: Mutex::new(State {
				configuration: self.configuration,
				driver: None,
			}),
		}
	}
}
