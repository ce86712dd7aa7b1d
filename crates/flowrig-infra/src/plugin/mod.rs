//! Plugin implementations backing the `flowrig-core` plugin ports.
//!
//! - `subprocess` -- external plugin executables speaking JSON over stdio
//! - `local_store` -- `PluginStore` over the plugin directory
//! - `http_fetcher` -- `ArtifactFetcher` downloading and unpacking tar.gz releases
//! - `builtin` -- `shell`, `file`, and `http` plugins registered in every engine

pub mod builtin;
pub mod http_fetcher;
pub mod local_store;
pub mod subprocess;

pub use http_fetcher::HttpFetcher;
pub use local_store::LocalPluginStore;
pub use subprocess::SubprocessPlugin;
