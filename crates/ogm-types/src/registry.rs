//! Registry trait for self-registering implementations.
//!
//! Every pluggable backend declares the identifier it answers to in
//! configuration files together with the factory that builds it, so the
//! set of available backends can be assembled without reflection.

/// Base trait for implementation registries.
///
/// Each implementation module (one per driver backend) provides a `Registry`
/// unit struct implementing this trait.
pub trait ImplementationRegistry {
	/// The identifier used in configuration to select this implementation.
	///
	/// This is the value of the `driver` key, for example:
	/// - "http" for `driver = "http"`
	/// - "embedded" for `driver=embedded` in a properties file
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Returns the factory that default-constructs this implementation.
	fn factory() -> Self::Factory;
}
