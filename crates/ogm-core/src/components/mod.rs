//! The driver registry.
//!
//! `Components` is the single owner of the active driver and the active
//! configuration. All state sits behind one async mutex, so lazy creation,
//! replacement and teardown are serialized: a caller never sees a driver that
//! is still being configured, and an outgoing driver is closed before its
//! successor becomes visible.
//!
//! Operations stay consistent when the calling future is dropped part way:
//! an outgoing driver is closed on a spawned task and stays registered until
//! that close finishes, and a driver being configured when its caller goes
//! away is closed instead of leaked.
//!
//! There are two ways to change the configuration:
//! - [`Components::configure`] replaces it wholesale and always discards the
//!   current driver.
//! - [`Components::update_configuration`] edits it in place and discards the
//!   driver only when the `driver` identifier no longer matches it.

pub mod builder;

use crate::{factory::DriverFactories, ComponentsError};
use ogm_config::{resolve_source_name, ConfigError, Configuration, ConfigurationSource, PropertyLookup};
use ogm_driver::{Driver, DriverError};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// A driver together with the identifier it was installed under.
struct ActiveDriver {
	name: String,
	driver: Arc<dyn Driver>,
}

impl ActiveDriver {
	/// True while the driver is open and still the one `configuration` names.
	fn matches(&self, configuration: &Configuration) -> bool {
		!self.driver.is_closed() && configuration.driver() == Some(self.name.as_str())
	}
}

struct State {
	configuration: Configuration,
	driver: Option<ActiveDriver>,
}

/// Registry owning the active driver and configuration.
pub struct Components {
	factories: DriverFactories,
	source: Arc<dyn ConfigurationSource>,
	properties: Arc<dyn PropertyLookup>,
	state: Mutex<State>,
}

impl Components {
	/// Creates a registry with the built-in drivers, a file source rooted at
	/// the working directory and the process environment.
	pub fn new() -> Self {
		builder::ComponentsBuilder::new().build()
	}

	pub fn builder() -> builder::ComponentsBuilder {
		builder::ComponentsBuilder::new()
	}

	pub fn factories(&self) -> &DriverFactories {
		&self.factories
	}

	/// Returns the active driver, creating it on first use.
	///
	/// When the configuration names no driver, the registry first loads the
	/// auto-configuration source. A failure leaves the registry without a
	/// driver, so the next call starts over.
	pub async fn driver(&self) -> Result<Arc<dyn Driver>, ComponentsError> {
		let mut state = self.state.lock().await;
		if let Some(active) = &state.driver {
			if active.matches(&state.configuration) {
				return Ok(Arc::clone(&active.driver));
			}
			// Left behind by an interrupted replacement.
			tracing::debug!(component = "driver", driver = %active.name, "Discarding stale driver");
			dispose(active).await;
			state.driver = None;
		}
		self.load_driver(&mut state).await
	}

	/// Returns the active driver without creating one.
	pub async fn loaded_driver(&self) -> Option<Arc<dyn Driver>> {
		let state = self.state.lock().await;
		state.driver.as_ref().map(|active| Arc::clone(&active.driver))
	}

	/// Installs `driver` as the active driver.
	///
	/// A different previously active driver is closed, and the configuration's
	/// driver identifier is rewritten to match `driver`. Installing the active
	/// driver again changes nothing.
	pub async fn set_driver(&self, driver: Arc<dyn Driver>) {
		let mut state = self.state.lock().await;
		tracing::debug!(component = "driver", driver = %driver.identifier(), "Setting driver");

		if let Some(active) = &state.driver {
			if Arc::ptr_eq(&active.driver, &driver) {
				return;
			}
			dispose(active).await;
			state.driver = None;
		}

		let name = driver.identifier().to_string();
		state.configuration.set_driver(name.clone());
		state.driver = Some(ActiveDriver { name, driver });
	}

	/// Replaces the configuration.
	///
	/// The active driver is closed even when the new configuration names the
	/// same identifier. The next driver is created lazily.
	pub async fn configure(&self, configuration: Configuration) -> Result<(), ComponentsError> {
		configuration.validate()?;
		let mut state = self.state.lock().await;
		replace(&mut state, configuration).await;
		Ok(())
	}

	/// Edits the configuration in place.
	///
	/// The active driver survives unless the edit changed the driver
	/// identifier away from it; in that case it is closed and the next
	/// [`Components::driver`] call builds the newly named driver from the
	/// edited configuration, all other settings included.
	pub async fn update_configuration<F>(&self, update: F)
	where
		F: FnOnce(&mut Configuration),
	{
		let mut state = self.state.lock().await;
		update(&mut state.configuration);

		if let Some(active) = &state.driver {
			if state.configuration.driver() != Some(active.name.as_str()) {
				tracing::info!(
					component = "driver",
					previous = %active.name,
					configured = ?state.configuration.driver(),
					"Driver identifier changed, discarding active driver"
				);
				dispose(active).await;
				state.driver = None;
			}
		}
	}

	/// Replaces the configuration with the one loaded from the source `name`.
	///
	/// Nothing changes when loading fails.
	pub async fn configure_from_source(&self, name: &str) -> Result<(), ComponentsError> {
		let mut state = self.state.lock().await;
		self.replace_from_source(&mut state, name).await?;
		Ok(())
	}

	/// Closes the active driver and resets the configuration to empty.
	pub async fn destroy(&self) {
		let mut state = self.state.lock().await;
		teardown(&mut state).await;
	}

	/// Returns a snapshot of the current configuration.
	pub async fn configuration(&self) -> Configuration {
		self.state.lock().await.configuration.clone()
	}

	async fn load_driver(&self, state: &mut State) -> Result<Arc<dyn Driver>, ComponentsError> {
		if state.configuration.driver().is_none() {
			self.auto_configure(state).await?;
		}

		let name = state
			.configuration
			.driver()
			.ok_or(ComponentsError::MissingDriver)?
			.to_string();
		tracing::info!(component = "driver", driver = %name, "Loading driver");

		let driver = self.factories.create(&name).inspect_err(|e| {
			tracing::error!(component = "driver", driver = %name, error = %e, "Error loading driver");
		})?;

		let driver = configure_detached(driver, name.clone(), state.configuration.clone())
			.await
			.map_err(|source| ComponentsError::DriverConfiguration {
				name: name.clone(),
				source,
			})?;

		let driver: Arc<dyn Driver> = Arc::from(driver);
		state.driver = Some(ActiveDriver {
			name,
			driver: Arc::clone(&driver),
		});
		Ok(driver)
	}

	async fn auto_configure(&self, state: &mut State) -> Result<(), ComponentsError> {
		let source_name = resolve_source_name(self.properties.as_ref());
		tracing::info!(component = "config", source = %source_name, "Auto-configuring");

		let loaded = self.replace_from_source(state, &source_name).await;
		loaded.map_err(|source| ComponentsError::AutoConfiguration {
			source_name,
			source,
		})
	}

	async fn replace_from_source(&self, state: &mut State, name: &str) -> Result<(), ConfigError> {
		let configuration = self.source.load(name).await?;
		replace(state, configuration).await;
		Ok(())
	}
}

impl Default for Components {
	fn default() -> Self {
		Self::new()
	}
}

async fn replace(state: &mut State, configuration: Configuration) {
	teardown(state).await;
	state.configuration = configuration;
}

async fn teardown(state: &mut State) {
	if let Some(active) = &state.driver {
		dispose(active).await;
		state.driver = None;
	}
	state.configuration.clear();
}

/// Closes a driver that is leaving the registry. Failures are logged only.
///
/// The close runs on its own task, so it completes even if the caller is
/// dropped while waiting for it.
async fn dispose(active: &ActiveDriver) {
	let driver = Arc::clone(&active.driver);
	let closing = tokio::spawn(async move { driver.close().await });

	let error = match closing.await {
		Ok(Ok(())) => return,
		Ok(Err(e)) => e.to_string(),
		Err(e) => e.to_string(),
	};
	tracing::warn!(
		component = "driver",
		driver = %active.name,
		error = %error,
		"Failed to close driver"
	);
}

/// Configures a freshly created driver on its own task.
///
/// A driver that rejects its configuration is closed before the error is
/// returned. If the caller is dropped before the result arrives, the task
/// closes the driver itself.
async fn configure_detached(
	mut driver: Box<dyn Driver>,
	name: String,
	configuration: Configuration,
) -> Result<Box<dyn Driver>, DriverError> {
	let (tx, rx) = oneshot::channel();
	tokio::spawn(async move {
		let configured = driver.configure(&configuration).await;
		let result = match configured {
			Ok(()) => Ok(driver),
			Err(e) => {
				tracing::error!(component = "driver", driver = %name, error = %e, "Failed to configure driver");
				close_quietly(&*driver, &name).await;
				Err(e)
			},
		};
		if let Err(Ok(orphan)) = tx.send(result) {
			tracing::debug!(component = "driver", driver = %name, "Closing driver nobody waited for");
			close_quietly(&*orphan, &name).await;
		}
	});

	rx.await
		.map_err(|_| DriverError::Backend("driver configuration task failed".into()))?
}

async fn close_quietly(driver: &dyn Driver, name: &str) {
	if let Err(e) = driver.close().await {
		tracing::warn!(component = "driver", driver = %name, error = %e, "Failed to close driver");
	}
}

#[cfg(test)]
mod tests;
