pub mod client;
pub mod error;
pub mod pool;
pub mod reference;

pub use client::{ClientOptions, ManifestFetcher, RegistryClient};
pub use error::{ReferenceParseError, RegistryError, ResolveError};
pub use pool::{OciConnector, RegistryClientPool, RegistryConnector};
pub use reference::{ImageReference, TagOrDigest};
