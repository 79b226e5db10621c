//! Settings persistence primitives.
//!
//! - **codec**: binary encode/decode with optional zlib wrapping
//! - **fs**: filesystem access behind a trait
//! - **types**: file layout and load outcomes

pub mod codec;
pub mod fs;
pub mod types;

pub use fs::{FileSystem, LocalFileSystem};
pub use types::{LoadSource, SettingsFiles, SettingsStats};
