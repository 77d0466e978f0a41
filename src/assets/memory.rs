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
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{AssetError, AssetSource};

/// An asset source backed by in-memory buffers. Useful for embedding and tests.
#[derive(Clone, Default)]
pub struct MemoryAssetSource {
    assets: Arc<RwLock<HashMap<String, Arc<Vec<u8>>>>>,
}

impl MemoryAssetSource {
    pub fn new() -> MemoryAssetSource {
        MemoryAssetSource::default()
    }

    /// Adds or replaces an asset.
    pub fn insert(&self, path: &str, bytes: Vec<u8>) {
        self.assets.write().insert(path.to_string(), Arc::new(bytes));
    }

    pub fn remove(&self, path: &str) {
        self.assets.write().remove(path);
    }

    fn get(&self, path: &str) -> Result<Arc<Vec<u8>>, AssetError> {
        self.assets
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(path.to_string()))
    }
}

impl AssetSource for MemoryAssetSource {
    fn size(&self, path: &str) -> Result<u64, AssetError> {
        Ok(self.get(path)?.len() as u64)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        Ok(self.get(path)?.as_ref().clone())
    }
}
