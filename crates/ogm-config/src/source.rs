//! Named configuration sources and auto-configuration lookup.
//!
//! A configuration source turns a name such as `ogm.properties` into a
//! [`Configuration`]. The name used for auto-configuration comes from, in
//! order, the `OGM_PROPERTIES` environment variable, the `ogm.properties`
//! process property, and finally the literal default `ogm.properties`.

use crate::{loader::ConfigLoader, ConfigError, Configuration};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding the auto-configuration source name.
pub const CONFIG_SOURCE_ENV_VAR: &str = "OGM_PROPERTIES";
/// Process property overriding the auto-configuration source name.
pub const CONFIG_SOURCE_PROPERTY: &str = "ogm.properties";
/// Source name used when no override is present.
pub const DEFAULT_CONFIG_SOURCE: &str = "ogm.properties";

/// Produces configurations from named sources.
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
	/// Loads the source called `name`.
	///
	/// Fails with [`ConfigError::SourceNotFound`] when no such source exists.
	async fn load(&self, name: &str) -> Result<Configuration, ConfigError>;
}

/// Loads configuration files from an ordered list of directories.
///
/// Absolute names are used as-is. Relative names are looked up in each
/// search path in turn and the first existing file wins.
#[derive(Debug, Clone)]
pub struct FileSource {
	search_paths: Vec<PathBuf>,
}

impl FileSource {
	pub fn new<I, P>(search_paths: I) -> Self
	where
		I: IntoIterator<Item = P>,
		P: Into<PathBuf>,
	{
		Self {
			search_paths: search_paths.into_iter().map(Into::into).collect(),
		}
	}

	/// A source searching only the working directory.
	pub fn current_dir() -> Self {
		Self::new(["."])
	}

	pub fn search_paths(&self) -> &[PathBuf] {
		&self.search_paths
	}

	fn locate(&self, name: &str) -> Option<PathBuf> {
		let path = Path::new(name);
		if path.is_absolute() {
			return path.is_file().then(|| path.to_path_buf());
		}
		self.search_paths
			.iter()
			.map(|dir| dir.join(path))
			.find(|candidate| candidate.is_file())
	}
}

impl Default for FileSource {
	fn default() -> Self {
		Self::current_dir()
	}
}

#[async_trait]
impl ConfigurationSource for FileSource {
	async fn load(&self, name: &str) -> Result<Configuration, ConfigError> {
		let path = self
			.locate(name)
			.ok_or_else(|| ConfigError::SourceNotFound(name.to_string()))?;
		// The loader resolves relative paths against its base, so hand it an
		// absolute one.
		let path = tokio::fs::canonicalize(&path).await?;
		tracing::debug!(source = %path.display(), "Loading configuration");

		let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
		let mut loader = ConfigLoader::new(base_dir);
		loader.load_config(&path).await
	}
}

/// String-keyed lookups consulted when choosing the auto-configuration
/// source.
pub trait PropertyLookup: Send + Sync {
	fn env_var(&self, key: &str) -> Option<String>;
	fn property(&self, key: &str) -> Option<String>;
}

/// Reads the process environment plus an in-process property table.
#[derive(Debug, Default)]
pub struct SystemProperties {
	properties: DashMap<String, String>,
}

impl SystemProperties {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
		self.properties.insert(key.into(), value.into());
	}

	pub fn remove_property(&self, key: &str) -> Option<String> {
		self.properties.remove(key).map(|(_, value)| value)
	}
}

impl PropertyLookup for SystemProperties {
	fn env_var(&self, key: &str) -> Option<String> {
		std::env::var(key).ok()
	}

	fn property(&self, key: &str) -> Option<String> {
		self.properties.get(key).map(|value| value.clone())
	}
}

/// Picks the auto-configuration source name. Empty values count as unset.
///
/// The environment variable is `OGM_PROPERTIES` rather than the property
/// key `ogm.properties`, since dotted names cannot be exported from most
/// shells.
pub fn resolve_source_name(lookup: &dyn PropertyLookup) -> String {
	let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

	non_empty(lookup.env_var(CONFIG_SOURCE_ENV_VAR))
		.or_else(|| non_empty(lookup.property(CONFIG_SOURCE_PROPERTY)))
		.unwrap_or_else(|| DEFAULT_CONFIG_SOURCE.to_string())
}
