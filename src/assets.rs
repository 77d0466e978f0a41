// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Asset sources supply the raw bytes of packaged sample files by path.

mod directory;
mod memory;

pub use directory::DirectoryAssetSource;
pub use memory::MemoryAssetSource;

/// Errors reported by an asset source. Missing assets and I/O failures are
/// kept apart so callers can report them differently.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("I/O error reading asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A read-only store of named assets. Implementations are called from loader
/// pool threads, never from the render thread.
pub trait AssetSource: Send + Sync {
    /// Returns the size of the asset in bytes.
    fn size(&self, path: &str) -> Result<u64, AssetError>;

    /// Reads the whole asset into memory.
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError>;
}
