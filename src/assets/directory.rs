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
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{AssetError, AssetSource};

/// Serves assets from a directory on disk. Asset paths are relative to the
/// root; absolute paths are used as given.
#[derive(Clone, Debug)]
pub struct DirectoryAssetSource {
    root: PathBuf,
}

impl DirectoryAssetSource {
    pub fn new<P: AsRef<Path>>(root: P) -> DirectoryAssetSource {
        DirectoryAssetSource {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.root.join(path)
        }
    }

    fn map_error(path: &str, err: io::Error) -> AssetError {
        if err.kind() == io::ErrorKind::NotFound {
            AssetError::NotFound(path.to_string())
        } else {
            AssetError::Io {
                path: path.to_string(),
                source: err,
            }
        }
    }
}

impl AssetSource for DirectoryAssetSource {
    fn size(&self, path: &str) -> Result<u64, AssetError> {
        let metadata = fs::metadata(self.resolve(path)).map_err(|e| Self::map_error(path, e))?;
        if metadata.is_dir() {
            return Err(AssetError::Io {
                path: path.to_string(),
                source: io::Error::other("path is a directory"),
            });
        }
        Ok(metadata.len())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        fs::read(self.resolve(path)).map_err(|e| Self::map_error(path, e))
    }
}
