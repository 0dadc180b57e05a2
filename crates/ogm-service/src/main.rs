//! Command-line entry point for the OGM driver registry.
//!
//! Resolves a driver the same way an embedding application would: either
//! from an explicitly named configuration source or through
//! auto-configuration, then reports the resolved driver as a JSON line.

use clap::Parser;
use ogm_config::{FileSource, SystemProperties};
use ogm_core::{Components, ComponentsError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line arguments for the registry binary.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Configuration source to load; auto-configuration is used when absent
	#[arg(short, long)]
	config: Option<String>,

	/// Directory searched for configuration sources (repeatable)
	#[arg(short, long = "search-path", default_value = ".")]
	search_path: Vec<PathBuf>,

	/// In-process property as KEY=VALUE (repeatable)
	#[arg(short, long, value_parser = parse_property)]
	property: Vec<(String, String)>,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Summary of the resolved driver, printed on stdout.
#[derive(Debug, Serialize, PartialEq)]
struct Status {
	driver: String,
	uri: Option<String>,
	closed: bool,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
	let (key, value) = raw
		.split_once('=')
		.ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
	let key = key.trim();
	if key.is_empty() {
		return Err(format!("empty property key in '{}'", raw));
	}
	Ok((key.to_string(), value.trim().to_string()))
}

fn build_components(args: &Args) -> Components {
	let properties = SystemProperties::new();
	for (key, value) in &args.property {
		properties.set_property(key.clone(), value.clone());
	}

	Components::builder()
		.with_source(Arc::new(FileSource::new(args.search_path.iter().cloned())))
		.with_properties(Arc::new(properties))
		.build()
}

async fn resolve(components: &Components, config: Option<&str>) -> Result<Status, ComponentsError> {
	if let Some(name) = config {
		components.configure_from_source(name).await?;
		tracing::info!("Loaded configuration [{}]", name);
	}

	let driver = components.driver().await?;
	let configuration = components.configuration().await;
	Ok(Status {
		driver: driver.identifier().to_string(),
		uri: configuration.uri().map(str::to_string),
		closed: driver.is_closed(),
	})
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let components = build_components(&args);
	tracing::debug!(factories = ?components.factories(), "Registry ready");

	let result = resolve(&components, args.config.as_deref()).await;
	components.destroy().await;

	let status = result?;
	println!("{}", serde_json::to_string(&status)?);
	Ok(())
}
