use std::collections::BTreeMap;
use std::ffi::{CString, c_char, c_void};

use thiserror::Error;

use crate::bus::Device;

/// Stable binary interface for out-of-tree memory-mapped devices.
///
/// A plugin supplies four C-ABI entry points. `alloc` parses a plugin-defined
/// argument string and returns an opaque instance handle, or null when
/// initialization fails. `load`/`store` receive that handle back unchanged
/// together with a device-relative offset and a caller-owned buffer of
/// `len` bytes, and report success the same way in-tree devices do.
/// `dealloc` releases the handle; it is invoked exactly once per instance.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MmioPlugin {
    pub alloc: unsafe extern "C" fn(args: *const c_char) -> *mut c_void,
    pub load:
        unsafe extern "C" fn(data: *mut c_void, offset: u64, len: usize, bytes: *mut u8) -> bool,
    pub store:
        unsafe extern "C" fn(data: *mut c_void, offset: u64, len: usize, bytes: *const u8) -> bool,
    pub dealloc: unsafe extern "C" fn(data: *mut c_void),
}

/// Errors raised by plugin registration and device construction.
///
/// `UnknownPlugin` and `InitFailed` are distinct failure modes: the first
/// means the name was never registered, the second that the plugin exists
/// but rejected the argument string it was instantiated with.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin \"{0}\" already registered")]
    DuplicateName(String),
    #[error("no plugin registered under \"{0}\"")]
    UnknownPlugin(String),
    #[error("plugin \"{0}\" failed to initialize")]
    InitFailed(String),
}

/// Shared namespace of plugin descriptors, keyed by name.
///
/// Constructed once at startup and passed by reference into every
/// plugin-device construction site. Append-only: names are never
/// unregistered, so a registry that is no longer being mutated can be shared
/// freely between execution contexts without locking.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, MmioPlugin>,
}

impl PluginRegistry {
    /// Empty registry with no plugins installed.
    pub fn new() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Registry pre-populated with the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // The namespace is empty, so the builtin names cannot collide.
        registry
            .register_builtins()
            .expect("builtin plugin names are unique");
        registry
    }

    /// Install the built-in plugins; call before constructing user devices.
    ///
    /// Currently registers the file-backed device under `"file"`.
    #[cfg(unix)]
    pub fn register_builtins(&mut self) -> Result<(), PluginError> {
        self.register(crate::devices::file::NAME, crate::devices::file::plugin())
    }

    #[cfg(not(unix))]
    pub fn register_builtins(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Store `plugin` under `name`. Duplicate names are refused and the
    /// original descriptor stays installed.
    pub fn register(&mut self, name: &str, plugin: MmioPlugin) -> Result<(), PluginError> {
        if self.plugins.contains_key(name) {
            return Err(PluginError::DuplicateName(name.to_owned()));
        }
        log::debug!("[Plugin] registered \"{}\"", name);
        self.plugins.insert(name.to_owned(), plugin);
        Ok(())
    }

    /// Descriptor registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<&MmioPlugin, PluginError> {
        self.plugins
            .get(name)
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_owned()))
    }
}

/// A bus device backed by a registered plugin instance.
///
/// Owns the opaque handle returned by the plugin's `alloc` and releases it
/// through `dealloc` exactly once when dropped. Offset/length validation is
/// delegated entirely to the plugin callbacks.
pub struct MmioPluginDevice {
    plugin: MmioPlugin,
    user_data: *mut c_void,
}

impl MmioPluginDevice {
    /// Instantiate the plugin registered under `name` with `args`.
    ///
    /// Fails with [`PluginError::UnknownPlugin`] when no such name exists,
    /// and with [`PluginError::InitFailed`] when the plugin's `alloc`
    /// returns a null handle for these arguments (or the arguments cannot
    /// cross the C boundary).
    pub fn new(registry: &PluginRegistry, name: &str, args: &str) -> Result<Self, PluginError> {
        let plugin = *registry.lookup(name)?;
        let args = CString::new(args).map_err(|_| PluginError::InitFailed(name.to_owned()))?;
        // SAFETY: `args` is a valid NUL-terminated string for the duration
        // of the call; the descriptor was supplied at registration.
        let user_data = unsafe { (plugin.alloc)(args.as_ptr()) };
        if user_data.is_null() {
            log::warn!("[Plugin] \"{}\" rejected args", name);
            return Err(PluginError::InitFailed(name.to_owned()));
        }
        Ok(Self { plugin, user_data })
    }
}

impl Device for MmioPluginDevice {
    fn load(&mut self, offset: u64, bytes: &mut [u8]) -> bool {
        // SAFETY: `user_data` came from this plugin's `alloc` and `bytes`
        // is valid for `bytes.len()` writable bytes.
        unsafe { (self.plugin.load)(self.user_data, offset, bytes.len(), bytes.as_mut_ptr()) }
    }

    fn store(&mut self, offset: u64, bytes: &[u8]) -> bool {
        // SAFETY: as for `load`; the buffer is only read.
        unsafe { (self.plugin.store)(self.user_data, offset, bytes.len(), bytes.as_ptr()) }
    }
}

impl Drop for MmioPluginDevice {
    fn drop(&mut self) {
        // SAFETY: `user_data` is non-null (checked at construction) and has
        // not been released before; `drop` runs at most once.
        unsafe { (self.plugin.dealloc)(self.user_data) }
    }
}
