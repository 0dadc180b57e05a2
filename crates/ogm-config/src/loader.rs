//! File loading for configuration sources.
//!
//! TOML files may include other TOML files; every other file is read as a
//! Java-style properties file. Both formats get `${VAR}` substitution before
//! parsing.

use crate::{resolve_env_vars, ConfigError, Configuration};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Loads one configuration file, following TOML includes.
pub struct ConfigLoader {
	/// Base path for resolving relative includes.
	base_path: PathBuf,
	/// Canonical paths already read, for cycle detection.
	loaded_files: HashSet<PathBuf>,
	/// Which file defined each top-level key.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads and validates the configuration stored at `config_path`.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Configuration, ConfigError> {
		let config_path = self.resolve_path(config_path)?;
		let content = self.load_file(&config_path).await?;

		if !is_toml(&config_path) {
			return Configuration::from_properties(parse_properties(&content)?);
		}

		// `content` is already substituted; it must not pass through
		// `Configuration::from_str`, which would substitute again.
		let main_toml: toml::Value = toml::from_str(&content)?;
		let includes = extract_includes(&main_toml)?;
		let combined = if includes.is_empty() {
			main_toml
		} else {
			self.load_and_combine(main_toml, includes, config_path)
				.await?
		};
		let config: Configuration = combined.try_into()?;
		config.validate()?;
		Ok(config)
	}

	/// Reads a file once and resolves environment references.
	async fn load_file(&mut self, path: &Path) -> Result<String, ConfigError> {
		let canonical_path = tokio::fs::canonicalize(path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.loaded_files.insert(canonical_path.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical_path.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		resolve_env_vars(&content)
	}

	async fn load_and_combine(
		&mut self,
		mut main_toml: toml::Value,
		includes: Vec<PathBuf>,
		main_file_path: PathBuf,
	) -> Result<toml::Value, ConfigError> {
		if let Some(table) = main_toml.as_table_mut() {
			table.remove("include");
			for key in table.keys() {
				self.section_sources
					.insert(key.clone(), main_file_path.clone());
			}
		}

		for include_path in includes {
			let resolved_path = self.resolve_path(&include_path)?;
			if !is_toml(&resolved_path) {
				return Err(ConfigError::Validation(format!(
					"Only TOML files can be included: {}",
					resolved_path.display()
				)));
			}
			let include_content = self.load_file(&resolved_path).await?;
			let include_toml: toml::Value = toml::from_str(&include_content)?;

			let Some(include_table) = include_toml.as_table() else {
				continue;
			};
			for key in include_table.keys() {
				if let Some(existing_source) = self.section_sources.get(key) {
					return Err(ConfigError::Validation(format!(
						"Duplicate key '{}' found in {} and {}. \
						Each top-level key must be defined by exactly one file.",
						key,
						existing_source.display(),
						resolved_path.display()
					)));
				}
				self.section_sources
					.insert(key.clone(), resolved_path.clone());
			}
			if let Some(main_table) = main_toml.as_table_mut() {
				for (key, value) in include_table {
					main_table.insert(key.clone(), value.clone());
				}
			}
		}

		Ok(main_toml)
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.is_file() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}

		Ok(resolved)
	}
}

fn is_toml(path: &Path) -> bool {
	path.extension().is_some_and(|ext| ext == "toml")
}

fn extract_includes(toml: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	let Some(include_value) = toml.get("include") else {
		return Ok(Vec::new());
	};

	if let Some(path_str) = include_value.as_str() {
		return Ok(vec![PathBuf::from(path_str)]);
	}

	let include_array = include_value.as_array().ok_or_else(|| {
		ConfigError::Validation("Include must be a string or array of strings".into())
	})?;
	include_array
		.iter()
		.map(|item| {
			item.as_str().map(PathBuf::from).ok_or_else(|| {
				ConfigError::Validation("Include array must contain only strings".into())
			})
		})
		.collect()
}

/// Splits properties-file text into key/value pairs, in file order.
///
/// Follows the Java properties format: lines starting with `#` or `!` are
/// comments, a line ending in an odd number of backslashes continues on the
/// next line, and the key ends at the first unescaped `=`, `:` or
/// whitespace. Backslash escapes (`\t`, `\n`, `\uXXXX`, `\=` ...) are
/// decoded in both keys and values. Values are trimmed.
pub fn parse_properties(content: &str) -> Result<Vec<(String, String)>, ConfigError> {
	let mut properties = Vec::new();
	let mut lines = content.lines().enumerate();
	while let Some((index, raw_line)) = lines.next() {
		let line = raw_line.trim_start();
		if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
			continue;
		}

		let mut logical = line.to_string();
		while ends_with_continuation(&logical) {
			logical.pop();
			match lines.next() {
				Some((_, next)) => logical.push_str(next.trim_start()),
				None => break,
			}
		}

		let line_number = index + 1;
		let (key, value) = split_property(&logical);
		let key = unescape(key, line_number)?;
		if key.is_empty() {
			return Err(ConfigError::Parse(format!(
				"Line {} has a value but no key",
				line_number
			)));
		}
		let value = unescape(value, line_number)?;
		properties.push((key, value.trim_end().to_string()));
	}
	Ok(properties)
}

fn ends_with_continuation(line: &str) -> bool {
	line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Splits a logical line into its raw key and raw value.
fn split_property(line: &str) -> (&str, &str) {
	let mut escaped = false;
	let mut key_end = line.len();
	for (pos, c) in line.char_indices() {
		if escaped {
			escaped = false;
			continue;
		}
		match c {
			'\\' => escaped = true,
			'=' | ':' => return (&line[..pos], line[pos + 1..].trim_start()),
			c if c.is_whitespace() => {
				key_end = pos;
				break;
			},
			_ => {},
		}
	}

	// Whitespace may be followed by one explicit separator.
	let rest = line[key_end..].trim_start();
	let value = rest.strip_prefix(['=', ':']).unwrap_or(rest).trim_start();
	(&line[..key_end], value)
}

fn unescape(raw: &str, line_number: usize) -> Result<String, ConfigError> {
	let mut decoded = String::with_capacity(raw.len());
	let mut chars = raw.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			decoded.push(c);
			continue;
		}
		match chars.next() {
			Some('t') => decoded.push('\t'),
			Some('n') => decoded.push('\n'),
			Some('r') => decoded.push('\r'),
			Some('f') => decoded.push('\u{000C}'),
			Some('u') => {
				let hex: String = chars.by_ref().take(4).collect();
				let unicode = (hex.len() == 4 && hex.chars().all(|c| c.is_ascii_hexdigit()))
					.then(|| u32::from_str_radix(&hex, 16).ok())
					.flatten()
					.and_then(char::from_u32)
					.ok_or_else(|| {
						ConfigError::Parse(format!(
							"Line {} has a malformed \\u escape: '\\u{}'",
							line_number, hex
						))
					})?;
				decoded.push(unicode);
			},
			Some(other) => decoded.push(other),
			None => {},
		}
	}
	Ok(decoded)
}
