use super::*;
use async_trait::async_trait;
use ogm_config::FileSource;
use ogm_driver::DriverError;
use ogm_types::{ConfigSchema, Schema};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Shared counters observed by every stub driver a factory produces.
#[derive(Default)]
struct Counters {
	created: AtomicUsize,
	configured: AtomicUsize,
	closed: AtomicUsize,
	/// `created` as seen by each close, to check ordering.
	created_at_close: std::sync::Mutex<Vec<usize>>,
}

impl Counters {
	fn created(&self) -> usize {
		self.created.load(Ordering::SeqCst)
	}

	fn configured(&self) -> usize {
		self.configured.load(Ordering::SeqCst)
	}

	fn closed(&self) -> usize {
		self.closed.load(Ordering::SeqCst)
	}
}

struct StubDriver {
	name: &'static str,
	counters: Arc<Counters>,
	fail_configure: bool,
	fail_close: bool,
	close_delay: Option<Duration>,
	closed: AtomicBool,
}

impl StubDriver {
	fn new(name: &'static str, counters: Arc<Counters>) -> Self {
		counters.created.fetch_add(1, Ordering::SeqCst);
		Self {
			name,
			counters,
			fail_configure: false,
			fail_close: false,
			close_delay: None,
			closed: AtomicBool::new(false),
		}
	}
}

#[async_trait]
impl Driver for StubDriver {
	fn identifier(&self) -> &str {
		self.name
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(Schema::default())
	}

	async fn configure(&mut self, _config: &Configuration) -> Result<(), DriverError> {
		// Widen the window in which concurrent callers could race.
		tokio::time::sleep(Duration::from_millis(20)).await;
		self.counters.configured.fetch_add(1, Ordering::SeqCst);
		if self.fail_configure {
			return Err(DriverError::Configuration("rejected".into()));
		}
		Ok(())
	}

	async fn close(&self) -> Result<(), DriverError> {
		if let Some(delay) = self.close_delay {
			tokio::time::sleep(delay).await;
		}
		self.closed.store(true, Ordering::SeqCst);
		self.counters.closed.fetch_add(1, Ordering::SeqCst);
		self.counters
			.created_at_close
			.lock()
			.unwrap()
			.push(self.counters.created());
		if self.fail_close {
			return Err(DriverError::Backend("close failed".into()));
		}
		Ok(())
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}
}

fn stub_factories(counters: &Arc<Counters>, names: &[&'static str]) -> DriverFactories {
	let mut factories = DriverFactories::new();
	for &name in names {
		let counters = Arc::clone(counters);
		factories.register(name, move || -> Box<dyn Driver> {
			Box::new(StubDriver::new(name, Arc::clone(&counters)))
		});
	}
	factories
}

/// In-memory configuration source counting its loads.
#[derive(Default)]
struct MapSource {
	sources: HashMap<String, Configuration>,
	loads: Mutex<Vec<String>>,
}

impl MapSource {
	fn with(mut self, name: &str, configuration: Configuration) -> Self {
		self.sources.insert(name.to_string(), configuration);
		self
	}

	async fn loads(&self) -> Vec<String> {
		self.loads.lock().await.clone()
	}
}

#[async_trait]
impl ConfigurationSource for MapSource {
	async fn load(&self, name: &str) -> Result<Configuration, ConfigError> {
		self.loads.lock().await.push(name.to_string());
		self.sources
			.get(name)
			.cloned()
			.ok_or_else(|| ConfigError::SourceNotFound(name.to_string()))
	}
}

/// Property lookup with no overrides unless given.
#[derive(Default)]
struct FixedProperties {
	property: Option<String>,
}

impl PropertyLookup for FixedProperties {
	fn env_var(&self, _key: &str) -> Option<String> {
		None
	}

	fn property(&self, key: &str) -> Option<String> {
		if key == ogm_config::CONFIG_SOURCE_PROPERTY {
			self.property.clone()
		} else {
			None
		}
	}
}

fn registry(
	counters: &Arc<Counters>,
	source: Arc<MapSource>,
	configuration: Configuration,
) -> Components {
	Components::builder()
		.with_factories(stub_factories(counters, &["alpha", "beta"]))
		.with_source(source)
		.with_properties(Arc::new(FixedProperties::default()))
		.with_configuration(configuration)
		.build()
}

fn alpha_config() -> Configuration {
	Configuration::new()
		.with_driver("alpha")
		.with_uri("bolt://alpha:7687")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_driver() {
	let counters = Arc::new(Counters::default());
	let components = Arc::new(registry(
		&counters,
		Arc::new(MapSource::default()),
		alpha_config(),
	));

	let handles: Vec<_> = (0..16)
		.map(|_| {
			let components = Arc::clone(&components);
			tokio::spawn(async move { components.driver().await.unwrap() })
		})
		.collect();

	let mut drivers = Vec::new();
	for handle in handles {
		drivers.push(handle.await.unwrap());
	}

	assert_eq!(counters.created(), 1);
	assert_eq!(counters.configured(), 1);
	for driver in &drivers {
		assert!(Arc::ptr_eq(driver, &drivers[0]));
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_calls_auto_configure_once() {
	let counters = Arc::new(Counters::default());
	let source = Arc::new(MapSource::default().with("ogm.properties", alpha_config()));
	let components = Arc::new(registry(&counters, Arc::clone(&source), Configuration::new()));

	let handles: Vec<_> = (0..8)
		.map(|_| {
			let components = Arc::clone(&components);
			tokio::spawn(async move { components.driver().await.unwrap() })
		})
		.collect();

	let mut drivers = Vec::new();
	for handle in handles {
		drivers.push(handle.await.unwrap());
	}

	assert_eq!(source.loads().await.len(), 1);
	assert_eq!(counters.created(), 1);
	for driver in &drivers {
		assert!(Arc::ptr_eq(driver, &drivers[0]));
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_destroy_racing_driver_leaves_no_untracked_driver() {
	let counters = Arc::new(Counters::default());
	let source = Arc::new(MapSource::default().with("ogm.properties", alpha_config()));
	let components = Arc::new(registry(&counters, source, Configuration::new()));

	let mut getters = Vec::new();
	let mut destroyers = Vec::new();
	for _ in 0..8 {
		let components_get = Arc::clone(&components);
		getters.push(tokio::spawn(async move { components_get.driver().await.unwrap() }));
		let components_destroy = Arc::clone(&components);
		destroyers.push(tokio::spawn(async move { components_destroy.destroy().await }));
	}

	let mut drivers = Vec::new();
	for handle in getters {
		drivers.push(handle.await.unwrap());
	}
	for handle in destroyers {
		handle.await.unwrap();
	}

	// Every driver handed out is either the cached one or already closed.
	let cached = components.loaded_driver().await;
	for driver in &drivers {
		let is_cached = cached.as_ref().is_some_and(|c| Arc::ptr_eq(c, driver));
		assert!(is_cached || driver.is_closed());
	}
	// At most one driver is ever open, and it is the cached one.
	assert_eq!(counters.created() - counters.closed(), usize::from(cached.is_some()));
}

#[tokio::test]
async fn test_interrupted_replacement_still_closes_old_driver() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), Configuration::new());

	let mut slow = StubDriver::new("alpha", Arc::clone(&counters));
	slow.close_delay = Some(Duration::from_millis(200));
	let slow: Arc<dyn Driver> = Arc::new(slow);
	components.set_driver(Arc::clone(&slow)).await;

	let interrupted = tokio::time::timeout(
		Duration::from_millis(20),
		components.configure(Configuration::new().with_driver("beta")),
	)
	.await;
	assert!(interrupted.is_err());

	// The old driver is still tracked and the new configuration was not
	// installed.
	assert_eq!(components.configuration().await.driver(), Some("alpha"));
	assert!(components
		.loaded_driver()
		.await
		.is_some_and(|d| Arc::ptr_eq(&d, &slow)));

	tokio::time::sleep(Duration::from_millis(300)).await;
	assert!(slow.is_closed());

	// The closed driver is never handed out again.
	let fresh = components.driver().await.unwrap();
	assert!(!Arc::ptr_eq(&fresh, &slow));
	assert!(!fresh.is_closed());
	assert_eq!(fresh.identifier(), "alpha");
}

#[tokio::test]
async fn test_interrupted_creation_closes_fresh_driver() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());

	// Stub configuration takes 20ms.
	let interrupted = tokio::time::timeout(Duration::from_millis(5), components.driver()).await;
	assert!(interrupted.is_err());

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(counters.created(), 1);
	assert_eq!(counters.closed(), 1);
	assert!(components.loaded_driver().await.is_none());

	let driver = components.driver().await.unwrap();
	assert!(!driver.is_closed());
	assert_eq!(counters.created(), 2);
}

#[tokio::test]
async fn test_driver_is_cached_after_first_call() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());

	assert!(components.loaded_driver().await.is_none());
	let first = components.driver().await.unwrap();
	let second = components.driver().await.unwrap();

	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(first.identifier(), "alpha");
	assert_eq!(counters.created(), 1);
	assert!(components.loaded_driver().await.is_some());
}

#[tokio::test]
async fn test_update_of_unrelated_field_keeps_driver() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());
	let driver = components.driver().await.unwrap();

	components
		.update_configuration(|config| {
			config.connection_pool_size = Some(10);
			config.set_uri("bolt://elsewhere:7687");
		})
		.await;

	let again = components.driver().await.unwrap();
	assert!(Arc::ptr_eq(&driver, &again));
	assert_eq!(counters.created(), 1);
	assert_eq!(counters.closed(), 0);
	assert_eq!(
		components.configuration().await.uri(),
		Some("bolt://elsewhere:7687")
	);
}

#[tokio::test]
async fn test_update_of_driver_identifier_switches_driver() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());
	let old = components.driver().await.unwrap();

	components
		.update_configuration(|config| config.set_driver("beta"))
		.await;

	// The old driver is closed immediately, before any replacement exists.
	assert!(old.is_closed());
	assert_eq!(counters.closed(), 1);
	assert_eq!(*counters.created_at_close.lock().unwrap(), vec![1]);
	assert!(components.loaded_driver().await.is_none());

	let new = components.driver().await.unwrap();
	assert_eq!(new.identifier(), "beta");
	assert_eq!(counters.created(), 2);
	assert_eq!(counters.closed(), 1);

	// The rest of the edited configuration is carried over.
	let config = components.configuration().await;
	assert_eq!(config.driver(), Some("beta"));
	assert_eq!(config.uri(), Some("bolt://alpha:7687"));
}

#[tokio::test]
async fn test_configure_with_new_configuration_always_closes_driver() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());
	let old = components.driver().await.unwrap();

	// Same identifier, but a different configuration.
	components.configure(alpha_config()).await.unwrap();

	assert!(old.is_closed());
	assert_eq!(counters.closed(), 1);
	assert!(components.loaded_driver().await.is_none());

	let new = components.driver().await.unwrap();
	assert!(!Arc::ptr_eq(&old, &new));
	assert_eq!(new.identifier(), "alpha");
	assert_eq!(counters.created(), 2);
	assert_eq!(counters.closed(), 1);
}

#[tokio::test]
async fn test_configure_rejects_invalid_configuration() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());
	let driver = components.driver().await.unwrap();

	let mut invalid = alpha_config();
	invalid.connection_pool_size = Some(0);
	let result = components.configure(invalid).await;

	assert!(matches!(result, Err(ComponentsError::Config(_))));
	assert!(!driver.is_closed());
	assert_eq!(components.configuration().await, alpha_config());
}

#[tokio::test]
async fn test_destroy_then_driver_reruns_auto_configuration() {
	let counters = Arc::new(Counters::default());
	let source = Arc::new(MapSource::default().with("ogm.properties", alpha_config()));
	let components = registry(&counters, Arc::clone(&source), Configuration::new());

	let first = components.driver().await.unwrap();
	assert_eq!(source.loads().await, vec!["ogm.properties"]);

	components.destroy().await;
	assert!(first.is_closed());
	assert_eq!(components.configuration().await, Configuration::new());

	let second = components.driver().await.unwrap();
	assert!(!Arc::ptr_eq(&first, &second));
	assert_eq!(source.loads().await, vec!["ogm.properties", "ogm.properties"]);
	assert_eq!(counters.created(), 2);
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());
	components.driver().await.unwrap();

	components.destroy().await;
	components.destroy().await;

	assert_eq!(counters.closed(), 1);
	assert!(components.loaded_driver().await.is_none());
}

#[tokio::test]
async fn test_set_driver_twice_with_same_instance_does_not_close() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), Configuration::new());
	let driver: Arc<dyn Driver> = Arc::new(StubDriver::new("alpha", Arc::clone(&counters)));

	components.set_driver(Arc::clone(&driver)).await;
	components.set_driver(Arc::clone(&driver)).await;

	assert!(!driver.is_closed());
	assert_eq!(counters.closed(), 0);
	let active = components.driver().await.unwrap();
	assert!(Arc::ptr_eq(&active, &driver));
}

#[tokio::test]
async fn test_set_driver_replaces_and_rewrites_identifier() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());
	let old = components.driver().await.unwrap();

	let replacement: Arc<dyn Driver> = Arc::new(StubDriver::new("beta", Arc::clone(&counters)));
	components.set_driver(Arc::clone(&replacement)).await;

	assert!(old.is_closed());
	assert!(!replacement.is_closed());
	let config = components.configuration().await;
	assert_eq!(config.driver(), Some("beta"));
	assert_eq!(config.uri(), Some("bolt://alpha:7687"));

	// The installed driver matches the configuration, so edits keep it.
	components
		.update_configuration(|config| config.set_uri("bolt://beta:7687"))
		.await;
	let active = components.driver().await.unwrap();
	assert!(Arc::ptr_eq(&active, &replacement));
}

#[tokio::test]
async fn test_missing_default_source_fails_without_caching() {
	let counters = Arc::new(Counters::default());
	let source = Arc::new(MapSource::default());
	let components = registry(&counters, Arc::clone(&source), Configuration::new());

	let err = components.driver().await.err().unwrap();
	assert!(err.is_resolution_failure());
	assert!(matches!(
		err,
		ComponentsError::AutoConfiguration {
			ref source_name,
			source: ConfigError::SourceNotFound(_),
		} if source_name == "ogm.properties"
	));
	assert!(components.loaded_driver().await.is_none());

	// The failure is not remembered.
	assert!(components.driver().await.is_err());
	assert_eq!(source.loads().await.len(), 2);
	assert_eq!(counters.created(), 0);
}

#[tokio::test]
async fn test_auto_configuration_uses_property_override() {
	let counters = Arc::new(Counters::default());
	let source = Arc::new(MapSource::default().with("custom.properties", alpha_config()));
	let components = Components::builder()
		.with_factories(stub_factories(&counters, &["alpha"]))
		.with_source(Arc::clone(&source) as Arc<dyn ConfigurationSource>)
		.with_properties(Arc::new(FixedProperties {
			property: Some("custom.properties".to_string()),
		}))
		.build();

	let driver = components.driver().await.unwrap();
	assert_eq!(driver.identifier(), "alpha");
	assert_eq!(source.loads().await, vec!["custom.properties"]);
}

#[tokio::test]
async fn test_auto_configured_source_without_driver() {
	let counters = Arc::new(Counters::default());
	let source = Arc::new(
		MapSource::default().with("ogm.properties", Configuration::new().with_uri("bolt://x")),
	);
	let components = registry(&counters, source, Configuration::new());

	let err = components.driver().await.err().unwrap();
	assert!(matches!(err, ComponentsError::MissingDriver));
}

#[tokio::test]
async fn test_unknown_driver_is_fatal_and_not_cached() {
	let counters = Arc::new(Counters::default());
	let components = registry(
		&counters,
		Arc::new(MapSource::default()),
		Configuration::new().with_driver("gamma"),
	);

	let err = components.driver().await.err().unwrap();
	assert!(
		matches!(err, ComponentsError::UnknownDriver { ref name, ref available } if name == "gamma" && available == "alpha, beta")
	);
	assert!(components.loaded_driver().await.is_none());
	assert_eq!(counters.created(), 0);
}

#[tokio::test]
async fn test_driver_rejecting_configuration_is_closed_and_dropped() {
	let counters = Arc::new(Counters::default());
	let mut factories = DriverFactories::new();
	let factory_counters = Arc::clone(&counters);
	factories.register("picky", move || -> Box<dyn Driver> {
		let mut driver = StubDriver::new("picky", Arc::clone(&factory_counters));
		driver.fail_configure = true;
		Box::new(driver)
	});
	let components = Components::builder()
		.with_factories(factories)
		.with_source(Arc::new(MapSource::default()))
		.with_properties(Arc::new(FixedProperties::default()))
		.with_configuration(Configuration::new().with_driver("picky"))
		.build();

	let err = components.driver().await.err().unwrap();
	assert!(matches!(err, ComponentsError::DriverConfiguration { ref name, .. } if name == "picky"));
	assert_eq!(counters.closed(), 1);
	assert!(components.loaded_driver().await.is_none());

	// Nothing is remembered: the next call builds a fresh instance.
	assert!(components.driver().await.is_err());
	assert_eq!(counters.created(), 2);
}

#[tokio::test]
async fn test_close_failure_does_not_block_replacement() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), Configuration::new());

	let mut stubborn = StubDriver::new("alpha", Arc::clone(&counters));
	stubborn.fail_close = true;
	components.set_driver(Arc::new(stubborn)).await;

	components
		.configure(Configuration::new().with_driver("beta"))
		.await
		.unwrap();

	assert_eq!(counters.closed(), 1);
	let driver = components.driver().await.unwrap();
	assert_eq!(driver.identifier(), "beta");
}

#[tokio::test]
async fn test_configure_from_source_replaces_state() {
	let counters = Arc::new(Counters::default());
	let beta = Configuration::new()
		.with_driver("beta")
		.with_uri("bolt://beta:7687");
	let source = Arc::new(MapSource::default().with("beta.properties", beta.clone()));
	let components = registry(&counters, source, alpha_config());
	let old = components.driver().await.unwrap();

	components
		.configure_from_source("beta.properties")
		.await
		.unwrap();

	assert!(old.is_closed());
	assert_eq!(components.configuration().await, beta);
	assert_eq!(components.driver().await.unwrap().identifier(), "beta");
}

#[tokio::test]
async fn test_configure_from_missing_source_leaves_state_unchanged() {
	let counters = Arc::new(Counters::default());
	let components = registry(&counters, Arc::new(MapSource::default()), alpha_config());
	let driver = components.driver().await.unwrap();

	let err = components
		.configure_from_source("absent.properties")
		.await
		.err()
		.unwrap();

	assert!(matches!(
		err,
		ComponentsError::Config(ConfigError::SourceNotFound(_))
	));
	assert!(!driver.is_closed());
	assert_eq!(components.configuration().await, alpha_config());
	let again = components.driver().await.unwrap();
	assert!(Arc::ptr_eq(&driver, &again));
}

#[tokio::test]
async fn test_builtin_http_driver_from_properties_file() {
	let dir = tempfile::TempDir::new().unwrap();
	std::fs::write(
		dir.path().join("ogm.properties"),
		"driver=http\nURI=http://localhost:7474\nusername=neo4j\npassword=password\n",
	)
	.unwrap();

	let components = Components::builder()
		.with_source(Arc::new(FileSource::new([dir.path()])))
		.with_properties(Arc::new(FixedProperties::default()))
		.build();

	let driver = components.driver().await.unwrap();
	assert_eq!(driver.identifier(), "http");
	let config = components.configuration().await;
	assert_eq!(config.uri(), Some("http://localhost:7474"));

	components.destroy().await;
	assert!(driver.is_closed());
}

#[tokio::test]
async fn test_builtin_driver_rejects_incompatible_uri() {
	let components = Components::builder()
		.with_source(Arc::new(MapSource::default()))
		.with_properties(Arc::new(FixedProperties::default()))
		.with_configuration(
			Configuration::new()
				.with_driver("bolt")
				.with_uri("http://localhost:7474"),
		)
		.build();

	let err = components.driver().await.err().unwrap();
	assert!(matches!(err, ComponentsError::DriverConfiguration { ref name, .. } if name == "bolt"));
}
