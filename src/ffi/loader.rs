//! Binding Resolver
//!
//! Loads shared libraries through libloading, caches them per path and
//! resolves exported symbols into signature-checked [`BoundFunction`]s.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use libloading::{Library, Symbol};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::error::{FfiError, FfiResult};
use super::marshal::MarshalLimits;
use super::registry::SignatureRegistry;
use super::types::FunctionSignature;

/// A dynamically loaded library
pub struct NativeLibrary {
    /// Path the library was opened from
    path: PathBuf,
    /// The loaded library handle
    library: Library,
    /// Cached function symbols
    symbols: Mutex<HashMap<String, usize>>,
}

impl NativeLibrary {
    /// Load a library from the given path
    pub fn load(path: impl AsRef<Path>) -> FfiResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Safety: opening a library runs its initialisers. The harness only
        // opens paths the caller named explicitly.
        let library = unsafe {
            Library::new(&path).map_err(|e| FfiError::LibraryNotFound {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        };

        Ok(Self {
            path,
            library,
            symbols: Mutex::new(HashMap::new()),
        })
    }

    /// Get the path to this library
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address of an exported symbol
    pub fn symbol(&self, name: &str) -> FfiResult<usize> {
        let mut symbols = self.symbols.lock();
        if let Some(&addr) = symbols.get(name) {
            return Ok(addr);
        }

        let c_name = CString::new(name).map_err(|_| {
            FfiError::InvalidSignature(format!("symbol name '{}' contains NUL", name))
        })?;

        // Safety: only the address is read here. Type safety is enforced at
        // call time through the declared signature.
        let symbol: Symbol<*const ()> = unsafe {
            self.library
                .get(c_name.as_bytes_with_nul())
                .map_err(|_| FfiError::SymbolNotFound {
                    symbol: name.to_string(),
                    library: self.path.display().to_string(),
                })?
        };

        let addr = *symbol as usize;
        if addr == 0 {
            return Err(FfiError::SymbolNotFound {
                symbol: name.to_string(),
                library: self.path.display().to_string(),
            });
        }
        symbols.insert(name.to_string(), addr);
        Ok(addr)
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("path", &self.path)
            .finish()
    }
}

/// A resolved native symbol paired with its immutable signature
#[derive(Debug, Clone)]
pub struct BoundFunction {
    pub(crate) library: Arc<NativeLibrary>,
    pub(crate) signature: Arc<FunctionSignature>,
    pub(crate) addr: usize,
    pub(crate) limits: MarshalLimits,
}

impl BoundFunction {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn library_path(&self) -> &Path {
        self.library.path()
    }

    /// True when both functions were resolved against the same loaded library
    pub fn shares_library(&self, other: &BoundFunction) -> bool {
        Arc::ptr_eq(&self.library, &other.library)
    }
}

static GLOBAL: Lazy<BindingResolver> = Lazy::new(BindingResolver::new);

/// Resolves (library path, symbol) pairs into bound functions
///
/// Each distinct path is opened at most once. The cache is safe to share
/// between threads; invocation itself is not synchronised.
#[derive(Debug)]
pub struct BindingResolver {
    /// Base directory for relative library paths
    base_dir: Option<PathBuf>,
    /// Loaded libraries keyed by resolved path
    libraries: RwLock<HashMap<PathBuf, Arc<NativeLibrary>>>,
    /// Serialises first loads
    load_lock: Mutex<()>,
    /// Number of libraries actually opened
    loads: AtomicUsize,
    /// Declared signatures, keyed `path:function`
    signatures: RwLock<SignatureRegistry>,
    limits: MarshalLimits,
}

impl BindingResolver {
    /// Create a new resolver with an empty cache
    pub fn new() -> Self {
        Self {
            base_dir: None,
            libraries: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
            loads: AtomicUsize::new(0),
            signatures: RwLock::new(SignatureRegistry::new()),
            limits: MarshalLimits::default(),
        }
    }

    /// Process-wide resolver
    pub fn global() -> &'static BindingResolver {
        &GLOBAL
    }

    /// Resolve relative library paths against `dir`
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn with_limits(mut self, limits: MarshalLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> MarshalLimits {
        self.limits
    }

    /// Number of libraries opened so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }

    /// Paths of the libraries currently cached
    pub fn loaded_libraries(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.libraries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Get a loaded library, opening it on first reference
    pub fn library(&self, path: impl AsRef<Path>) -> FfiResult<Arc<NativeLibrary>> {
        let key = self.cache_key(path.as_ref());

        if let Some(lib) = self.libraries.read().get(&key) {
            return Ok(Arc::clone(lib));
        }

        let _guard = self.load_lock.lock();
        if let Some(lib) = self.libraries.read().get(&key) {
            return Ok(Arc::clone(lib));
        }

        let library = Arc::new(NativeLibrary::load(&key)?);
        self.loads.fetch_add(1, Ordering::AcqRel);
        info!(path = %key.display(), "loaded native library");
        self.libraries.write().insert(key, Arc::clone(&library));
        Ok(library)
    }

    /// Declare a signature in the scope of a library without resolving it
    pub fn declare(
        &self,
        path: impl AsRef<Path>,
        signature: FunctionSignature,
    ) -> FfiResult<Arc<FunctionSignature>> {
        let key = qualified_name(&self.cache_key(path.as_ref()), &signature.name);
        self.signatures.write().declare_signature(&key, signature)
    }

    /// Bind `signature.name` in the library at `path`
    ///
    /// The signature is declared in the library's scope: binding the same
    /// symbol again with an identical signature is idempotent, a different
    /// one fails with [`FfiError::DuplicateSignature`].
    pub fn resolve(
        &self,
        path: impl AsRef<Path>,
        signature: FunctionSignature,
    ) -> FfiResult<BoundFunction> {
        signature.validate()?;
        let library = self.library(path)?;
        let addr = library.symbol(&signature.name)?;

        let key = qualified_name(library.path(), &signature.name);
        let signature = self.signatures.write().declare_signature(&key, signature)?;
        debug!(function = %signature, library = %library.path().display(), "resolved symbol");

        Ok(BoundFunction {
            library,
            signature,
            addr,
            limits: self.limits,
        })
    }

    /// Bind a function whose signature was declared earlier
    pub fn resolve_declared(&self, path: impl AsRef<Path>, name: &str) -> FfiResult<BoundFunction> {
        let key = qualified_name(&self.cache_key(path.as_ref()), name);
        let signature = self.signatures.read().lookup(&key)?;
        self.resolve(path, (*signature).clone())
    }

    /// Signature declared for `name` in the library at `path`
    pub fn lookup(&self, path: impl AsRef<Path>, name: &str) -> FfiResult<Arc<FunctionSignature>> {
        let key = qualified_name(&self.cache_key(path.as_ref()), name);
        self.signatures.read().lookup(&key)
    }

    fn cache_key(&self, path: &Path) -> PathBuf {
        let joined = match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        };
        // Paths that do not exist on disk are left to the system loader's search.
        std::fs::canonicalize(&joined).unwrap_or(joined)
    }
}

impl Default for BindingResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn qualified_name(library: &Path, function: &str) -> String {
    format!("{}:{}", library.display(), function)
}
