//! Capability implementations
//!
//! `packages`, `fetch`, `host_fs` and `env_file` act on the real host;
//! `memory` keeps everything in process.

pub mod env_file;
pub mod fetch;
pub mod host_fs;
pub mod memory;
pub mod packages;

pub use env_file::FileEnvStore;
pub use fetch::HttpFetcher;
pub use host_fs::HostFileSystem;
pub use packages::CommandPackageInstaller;
