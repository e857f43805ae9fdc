use std::ffi::c_void;
use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use libloading::{Library, Symbol};
use tracing::debug;

/// Dynamically loaded libraries, opened once and kept for the lifetime of
/// the machine so resolved addresses stay valid.
#[derive(Debug, Default)]
pub struct LibraryCache {
    libraries: DashMap<String, Arc<Library>>,
}

impl LibraryCache {
    pub fn new() -> Self {
        Self {
            libraries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Address of `symbol` exported by `library`.
    pub fn resolve(&self, library: &str, symbol: &str) -> Result<usize> {
        let handle = self.open(library)?;
        // SAFETY: the symbol is only used as an address; its signature is
        // checked by the marshaling layer against the declared scope.
        let address = unsafe {
            let found: Symbol<'_, *const c_void> = handle
                .get(symbol.as_bytes())
                .with_context(|| format!("symbol {} not found in {}", symbol, library))?;
            *found as usize
        };
        ensure!(address != 0, "symbol {} in {} resolves to null", symbol, library);
        Ok(address)
    }

    fn open(&self, library: &str) -> Result<Arc<Library>> {
        if let Some(found) = self.libraries.get(library) {
            return Ok(Arc::clone(found.value()));
        }
        // SAFETY: loading runs the library's initializers; the embedder
        // chooses which libraries a program may name.
        let loaded = unsafe { Library::new(library) }.with_context(|| format!("cannot load library {}", library))?;
        debug!(target: "epoch::marshal", library, "loaded native library");
        Ok(match self.libraries.entry(library.to_string()) {
            Entry::Vacant(slot) => Arc::clone(slot.insert(Arc::new(loaded)).value()),
            Entry::Occupied(existing) => Arc::clone(existing.get()),
        })
    }
}
