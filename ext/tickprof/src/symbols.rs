use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use crate::code_cache::CodeCache;
use crate::error::SymbolsError;
use crate::frame::{NameId, Symbol};

pub const MAX_NATIVE_LIBS: usize = 4096;

const RUNTIME_CODE_NAME: &str = "[runtime]";

#[derive(Debug, Default)]
struct NameTable {
    names: Vec<Arc<str>>,
    index: HashMap<Arc<str>, NameId>,
}

/// All code caches of the process: one for the runtime's generated code plus
/// one per native library, and the names their symbols refer to.
///
/// [`Symbols::find`] is the only operation used while sampling; it never
/// locks. Names are only read at report time.
#[derive(Debug)]
pub struct Symbols {
    runtime_code: CodeCache,
    libraries: Box<[OnceLock<CodeCache>]>,
    library_count: AtomicUsize,
    names: RwLock<NameTable>,
    loaded_libraries: Mutex<HashSet<String>>,
}

impl Symbols {
    pub fn new(runtime_code_capacity: usize) -> Self {
        Self {
            runtime_code: CodeCache::new(RUNTIME_CODE_NAME, runtime_code_capacity),
            libraries: (0..MAX_NATIVE_LIBS).map(|_| OnceLock::new()).collect(),
            library_count: AtomicUsize::new(0),
            names: RwLock::new(NameTable::default()),
            loaded_libraries: Mutex::new(HashSet::new()),
        }
    }

    pub fn runtime_code(&self) -> &CodeCache {
        &self.runtime_code
    }

    pub fn libraries(&self) -> impl Iterator<Item = &CodeCache> {
        self.libraries[..self.library_count.load(Ordering::Acquire)]
            .iter()
            .filter_map(OnceLock::get)
    }

    pub fn intern(&self, name: &str) -> NameId {
        let mut table = self.names.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = table.index.get(name) {
            return *id;
        }
        let id = NameId(table.names.len() as u32);
        let name: Arc<str> = Arc::from(name);
        table.names.push(Arc::clone(&name));
        table.index.insert(name, id);
        id
    }

    pub fn name(&self, id: NameId) -> Option<Arc<str>> {
        let table = self.names.read().unwrap_or_else(PoisonError::into_inner);
        table.names.get(id.0 as usize).cloned()
    }

    pub fn is_library_loaded(&self, path: &str) -> bool {
        self.loaded_libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    /// Registers a native library's functions as `(address, size, name)`.
    /// Returns `Ok(false)` when a library with that path is already known.
    pub fn add_library(
        &self,
        path: &str,
        functions: Vec<(usize, usize, String)>,
    ) -> Result<bool, SymbolsError> {
        let mut loaded = self
            .loaded_libraries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if loaded.contains(path) {
            return Ok(false);
        }
        let count = self.library_count.load(Ordering::Relaxed);
        if count >= MAX_NATIVE_LIBS {
            return Err(SymbolsError::TooManyLibraries(MAX_NATIVE_LIBS));
        }

        let ranges = functions
            .into_iter()
            .map(|(address, size, name)| (address, size, Symbol::Named(self.intern(&name))))
            .collect();
        let cache = CodeCache::from_ranges(path, ranges);
        log::debug!("Loaded {} symbols from {}", cache.len(), path);

        // Only this function writes the slots, under the loaded_libraries lock
        let _ = self.libraries[count].set(cache);
        self.library_count.store(count + 1, Ordering::Release);
        loaded.insert(path.to_owned());
        Ok(true)
    }

    // Runtime code first, then native libraries in load order
    // async-signal-safe
    pub fn find(&self, address: usize) -> Option<Symbol> {
        self.runtime_code
            .find(address)
            .or_else(|| self.libraries().find_map(|library| library.find(address)))
    }

    /// Parses the executable objects mapped since the last call. Returns the
    /// number of libraries added.
    #[cfg(target_os = "linux")]
    pub fn refresh_native_libraries(&self) -> Result<usize, SymbolsError> {
        crate::native_libraries::load_mapped_objects(self)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn refresh_native_libraries(&self) -> Result<usize, SymbolsError> {
        Ok(0)
    }
}
