//! Registry trait for self-registering implementations.
//!
//! Storage and account backends are selected by name from configuration.
//! Each backend module exposes a `Registry` struct implementing this trait.

/// Base trait for implementation registries.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// e.g. "file" for `storage.implementations.file`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
