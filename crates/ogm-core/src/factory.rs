//! Identifier-to-factory table for driver implementations.

use crate::ComponentsError;
use ogm_driver::Driver;
use std::collections::HashMap;
use std::sync::Arc;

type BoxedFactory = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;

/// Factories for every driver the registry can instantiate, keyed by the
/// identifier used in configuration.
#[derive(Clone, Default)]
pub struct DriverFactories {
	factories: HashMap<String, BoxedFactory>,
}

impl DriverFactories {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a table holding every built-in driver.
	pub fn with_defaults() -> Self {
		let mut factories = Self::new();
		for (name, factory) in ogm_driver::get_all_implementations() {
			tracing::debug!("Registering driver implementation: {}", name);
			factories.register(name, factory);
		}
		factories
	}

	/// Registers `factory` under `name`, replacing any previous entry.
	pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
	where
		F: Fn() -> Box<dyn Driver> + Send + Sync + 'static,
	{
		self.factories.insert(name.into(), Arc::new(factory));
	}

	pub fn contains(&self, name: &str) -> bool {
		self.factories.contains_key(name)
	}

	/// Registered identifiers, sorted.
	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}

	/// Default-constructs the driver registered as `name`.
	pub fn create(&self, name: &str) -> Result<Box<dyn Driver>, ComponentsError> {
		let factory = self
			.factories
			.get(name)
			.ok_or_else(|| ComponentsError::UnknownDriver {
				name: name.to_string(),
				available: self.names().join(", "),
			})?;
		Ok(factory())
	}
}

impl std::fmt::Debug for DriverFactories {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DriverFactories")
			.field("names", &self.names())
			.finish()
	}
}
