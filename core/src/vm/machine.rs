use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, bail};
use tracing::{debug, error};

use crate::bytecode::{ExternalBinding, Loader, Program};
use crate::config::VmConfig;
use crate::error::{ExecutionOutcome, ExecutionResult, HaltReason};
use crate::heap::{BufferHeap, StringPool, StructureHeap};
use crate::marshal::LibraryCache;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::util::lock::lock_heap;

use super::context::ExecutionContext;
use super::entity::{EntityController, tags};
use super::jit::{JitBackend, NativeEntryPoint};

/// Built-in library handler. It pops its arguments from the context's
/// operand stack and pushes its result, if any.
pub type LibraryFunction = fn(&mut ExecutionContext<'_>) -> Result<()>;

/// Process-wide state shared by every [`ExecutionContext`]: the three
/// heaps, the registries the embedder fills before running and the optional
/// JIT backend.
///
/// Registration needs `&mut self`; running only `&self`, so several contexts
/// may share one machine. Lock order when holding both heap locks: buffers
/// before structures.
pub struct VirtualMachine {
    config: VmConfig,
    strings: StringPool,
    buffers: Mutex<BufferHeap>,
    structures: Mutex<StructureHeap>,
    library: FastHashMap<String, LibraryFunction>,
    controllers: FastHashMap<u32, Arc<dyn EntityController>>,
    native_symbols: FastHashMap<String, usize>,
    libraries: LibraryCache,
    native_entries: FastHashMap<String, NativeEntryPoint>,
    jit: Option<Arc<dyn JitBackend>>,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl VirtualMachine {
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            strings: StringPool::new(),
            buffers: Mutex::new(BufferHeap::new()),
            structures: Mutex::new(StructureHeap::new()),
            library: fast_hash_map_new(),
            controllers: fast_hash_map_new(),
            native_symbols: fast_hash_map_new(),
            libraries: LibraryCache::new(),
            native_entries: fast_hash_map_new(),
            jit: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    #[inline]
    pub fn strings(&self) -> &StringPool {
        &self.strings
    }

    pub fn buffers(&self) -> MutexGuard<'_, BufferHeap> {
        lock_heap(&self.buffers)
    }

    pub fn structures(&self) -> MutexGuard<'_, StructureHeap> {
        lock_heap(&self.structures)
    }

    pub fn register_library_function(&mut self, name: impl Into<String>, function: LibraryFunction) {
        self.library.insert(name.into(), function);
    }

    #[inline]
    pub fn library_function(&self, name: &str) -> Option<LibraryFunction> {
        self.library.get(name).copied()
    }

    /// Installs the meta-control for a custom entity tag. Reserved tags are
    /// handled by the interpreter and cannot be overridden.
    pub fn register_entity_controller(&mut self, tag: u32, controller: Arc<dyn EntityController>) -> Result<()> {
        if tags::is_reserved(tag) {
            bail!(
                "entity tag 0x{:x} is reserved (custom tags start at 0x{:x})",
                tag,
                tags::FIRST_CUSTOM
            );
        }
        self.controllers.insert(tag, controller);
        Ok(())
    }

    pub fn entity_controller(&self, tag: u32) -> Option<Arc<dyn EntityController>> {
        self.controllers.get(&tag).cloned()
    }

    /// Binds an exported symbol name to a native function address. Bindings
    /// take precedence over dynamically loaded libraries.
    pub fn register_native_symbol(&mut self, symbol: impl Into<String>, address: usize) {
        self.native_symbols.insert(symbol.into(), address);
    }

    #[inline]
    pub fn native_symbol(&self, symbol: &str) -> Option<usize> {
        self.native_symbols.get(symbol).copied()
    }

    /// Address of the function an `external` binding names.
    pub fn resolve_symbol(&self, binding: &ExternalBinding) -> Result<usize> {
        if let Some(address) = self.native_symbol(&binding.symbol) {
            return Ok(address);
        }
        self.libraries.resolve(&binding.library, &binding.symbol)
    }

    /// Registers a ready-made native implementation for function `name`.
    /// Loaded programs call it through `InvokeNative`.
    pub fn register_native_entry(&mut self, name: impl Into<String>, entry: NativeEntryPoint) {
        self.native_entries.insert(name.into(), entry);
    }

    pub fn native_entry(&self, name: &str) -> Option<NativeEntryPoint> {
        self.native_entries.get(name).cloned()
    }

    pub fn native_entries(&self) -> impl Iterator<Item = (&String, &NativeEntryPoint)> {
        self.native_entries.iter()
    }

    pub fn set_jit_backend(&mut self, backend: Arc<dyn JitBackend>) {
        self.jit = Some(backend);
    }

    #[inline]
    pub fn jit_backend(&self) -> Option<&Arc<dyn JitBackend>> {
        self.jit.as_ref()
    }

    /// Asks the JIT backend for an Epoch-callable wrapper around a raw native
    /// function pointer.
    pub fn wrap_native_callback(&self, native: usize) -> Option<NativeEntryPoint> {
        self.jit.as_ref()?.compile_callback_wrapper(native)
    }

    pub fn load(&self, bytes: &[u8]) -> Result<Program> {
        Loader::new(self).load(bytes)
    }

    /// Loads `bytes` and runs the program to completion.
    pub fn execute_bytecode(&self, bytes: &[u8]) -> Result<ExecutionOutcome> {
        let program = self.load(bytes)?;
        self.execute_program(&program)
    }

    /// Runs `program` on a fresh context. Panics escaping library or native
    /// code are turned into [`HaltReason::NativeFault`].
    pub fn execute_program(&self, program: &Program) -> Result<ExecutionOutcome> {
        let mut context = ExecutionContext::new(self, program);
        let result = match panic::catch_unwind(AssertUnwindSafe(|| context.execute())) {
            Ok(result) => result?,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(target: "epoch::vm", %message, "native fault during execution");
                ExecutionResult::Halted(HaltReason::NativeFault(message))
            }
        };
        if result.is_ok() {
            debug_assert!(
                context.stack().is_empty(),
                "operand stack holds {} values after a successful run",
                context.stack().len()
            );
        }
        debug!(target: "epoch::vm", ?result, "execution finished");
        Ok(ExecutionOutcome {
            result,
            return_value: context.register.take(),
        })
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
