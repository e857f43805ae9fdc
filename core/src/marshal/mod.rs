//! Native interop.
//!
//! Outbound calls go to functions tagged `external(library, symbol)`: the
//! declared parameters are converted to native words (strings become
//! NUL-terminated UTF-16 copies, buffers and structures are copied into
//! scratch memory, functions become callback trampolines), the symbol is
//! called and by-reference arguments are copied back. Strings are never
//! copied back, and a buffer passed by value is a private clone while a
//! buffer passed by reference is updated in place. A function pointer coming
//! back from native code is wrapped by the JIT backend and becomes an
//! ordinary function value.
//!
//! Inbound calls arrive through trampolines (see [`trampoline`]) and run the
//! target function on the context that made the outbound call.

mod abi;
mod layout;
mod library;
mod trampoline;


use std::fmt;

use anyhow::{Result, anyhow, ensure};
use tracing::trace;

use crate::bytecode::ExternalBinding;
use crate::error::{ExecutionResult, HaltReason};
use crate::heap::{BufferHandle, StringHandle, StructureHandle};
use crate::types::{TypeId, VariableEntry};
use crate::value::{Reference, Value};
use crate::vm::{ExecutionContext, Flow};

pub use abi::{MAX_NATIVE_ARGS, call_native};
pub use layout::{NATIVE_BOOL_SIZE, NATIVE_POINTER_SIZE, NativeField, NativeLayout, native_scalar_size};
pub use library::LibraryCache;
pub use trampoline::{CallbackAnchor, TRAMPOLINE_PAGE_SIZE, TRAMPOLINE_SLOT_SIZE, TargetAbi, TrampolineTemplate};

pub(crate) use trampoline::CallbackRegistry;

use layout::{read_array, write_bytes};

/// A parameter or return type the native path cannot convert. Surfaces as
/// [`HaltReason::UnsupportedMarshalType`] rather than a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsupported(pub String);

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Unsupported {}

/// Argument registers a callback trampoline spills.
const MAX_CALLBACK_ARGS: usize = 6;

/// Upper bound on the length of a UTF-16 string read from native memory.
const MAX_NATIVE_STRING: usize = 1 << 20;

/// Native memory that has to outlive one outbound call.
#[derive(Default)]
struct CallArena {
    wide: Vec<Vec<u16>>,
    blocks: Vec<Vec<u8>>,
    cells: Vec<Box<u64>>,
    write_backs: Vec<WriteBack>,
}

impl CallArena {
    fn wide(&mut self, text: &str) -> u64 {
        let mut wide: Vec<u16> = text.encode_utf16().collect();
        wide.push(0);
        let address = wide.as_ptr() as u64;
        self.wide.push(wide);
        address
    }

    fn block(&mut self, bytes: Vec<u8>) -> (usize, u64) {
        let address = bytes.as_ptr() as u64;
        self.blocks.push(bytes);
        (self.blocks.len() - 1, address)
    }

    fn cell(&mut self, word: u64) -> (usize, u64) {
        let mut cell = Box::new(word);
        let address = &mut *cell as *mut u64 as u64;
        self.cells.push(cell);
        (self.cells.len() - 1, address)
    }
}

enum WriteBack {
    Scalar {
        reference: Reference,
        type_id: TypeId,
        cell: usize,
    },
    Buffer {
        handle: BufferHandle,
        block: usize,
    },
    Structure {
        handle: StructureHandle,
        layout: NativeLayout,
        block: usize,
    },
}

fn is_word_scalar(type_id: TypeId) -> bool {
    matches!(
        type_id,
        TypeId::INTEGER | TypeId::INTEGER16 | TypeId::INTEGER64 | TypeId::BOOLEAN
    )
}

fn scalar_word(value: &Value) -> Result<u64> {
    Ok(match value {
        Value::Integer(v) => *v as i64 as u64,
        Value::Integer16(v) => *v as i64 as u64,
        Value::Integer64(v) => *v as u64,
        Value::Boolean(v) => u64::from(*v),
        other => return Err(anyhow!("expected an integer-class value, found {}", other.type_id())),
    })
}

fn word_to_scalar(type_id: TypeId, word: u64) -> Result<Value> {
    Ok(match type_id {
        TypeId::INTEGER => Value::Integer(word as u32 as i32),
        TypeId::INTEGER16 => Value::Integer16(word as u16 as i16),
        TypeId::INTEGER64 => Value::Integer64(word as i64),
        TypeId::BOOLEAN => Value::Boolean(word as u32 != 0),
        other => return Err(anyhow!(Unsupported(format!("native value of type {}", other)))),
    })
}

fn unsupported(detail: impl Into<String>) -> anyhow::Error {
    anyhow!(Unsupported(detail.into()))
}

/// Reads a NUL-terminated UTF-16 string.
///
/// # Safety
///
/// `address` must be null or point to a NUL-terminated UTF-16 sequence.
unsafe fn read_wide(address: u64) -> Result<String> {
    if address == 0 {
        return Ok(String::new());
    }
    let start = address as *const u16;
    let mut len = 0;
    // SAFETY: guaranteed by the caller up to and including the terminator.
    while unsafe { *start.add(len) } != 0 {
        len += 1;
        ensure!(len < MAX_NATIVE_STRING, "native string exceeds {} code units", MAX_NATIVE_STRING);
    }
    // SAFETY: `len` code units were just read.
    let units = unsafe { std::slice::from_raw_parts(start, len) };
    Ok(String::from_utf16_lossy(units))
}

/// Whether a callback may take a parameter of `type_id`. Function
/// parameters need the JIT backend to wrap the incoming pointer.
fn callback_parameter_supported(type_id: TypeId, can_wrap: bool) -> bool {
    is_word_scalar(type_id) || type_id == TypeId::STRING || (type_id == TypeId::FUNCTION && can_wrap)
}

/// Splits marshaling errors into halts (unsupported types) and fatal errors.
fn halt_or_fatal(err: anyhow::Error) -> Result<Flow> {
    match err.downcast::<Unsupported>() {
        Ok(Unsupported(detail)) => Ok(Flow::Halt(HaltReason::UnsupportedMarshalType(detail))),
        Err(err) => Err(err),
    }
}

impl<'vm> ExecutionContext<'vm> {
    /// Calls the native function bound to `name`. Arguments stay on the
    /// operand stack, and therefore rooted, until the call returns.
    pub(crate) fn call_external(&mut self, name: StringHandle, binding: &ExternalBinding) -> Result<Flow> {
        let program = self.program;
        let description = program
            .scope(name)
            .ok_or_else(|| anyhow!("external function {} has no scope description", name))?;
        let params: Vec<VariableEntry> = description.parameters().copied().collect();
        let return_type = description
            .return_variable()
            .map(|v| v.type_id)
            .filter(|t| *t != TypeId::NOTHING);

        if params.len() > MAX_NATIVE_ARGS {
            return halt_or_fatal(unsupported(format!(
                "{} parameters (at most {})",
                params.len(),
                MAX_NATIVE_ARGS
            )));
        }
        let can_wrap = self.vm.jit_backend().is_some();
        if let Some(type_id) = return_type
            && !(is_word_scalar(type_id) || type_id == TypeId::STRING || (type_id == TypeId::FUNCTION && can_wrap))
        {
            return halt_or_fatal(unsupported(format!("return type {}", type_id)));
        }

        let address = match self.vm.resolve_symbol(binding) {
            Ok(address) => address,
            Err(err) => {
                return Ok(Flow::Halt(HaltReason::LibraryResolution(format!(
                    "{} in {}: {:#}",
                    binding.symbol, binding.library, err
                ))));
            }
        };

        let args = self.stack.top(params.len())?.to_vec();
        let mut arena = CallArena::default();
        let mut words = vec![0u64; params.len()];
        for (nth, (param, arg)) in params.iter().zip(args).enumerate().rev() {
            match self.marshal_argument(&mut arena, param, arg) {
                Ok(word) => words[nth] = word,
                Err(err) => return halt_or_fatal(err),
            }
        }
        trace!(
            target: "epoch::marshal",
            symbol = %binding.symbol,
            library = %binding.library,
            args = words.len(),
            "calling native function"
        );

        let anchor: *const CallbackAnchor = self.callbacks.anchor();
        let context = (self as *mut Self).cast::<()>();
        // SAFETY: the anchor is boxed inside `self.callbacks` and lives as
        // long as this context.
        let previous = unsafe { (*anchor).bind(context) };
        // SAFETY: the declared scope describes the native signature; every
        // pointer in `words` is owned by `arena`, which outlives the call.
        let raw = unsafe { call_native(address, &words) };
        // SAFETY: as above.
        let failure = unsafe { (*anchor).release(previous) };
        let raw = match raw {
            Ok(raw) => raw,
            Err(err) => return halt_or_fatal(err),
        };

        self.stack.pop_many(params.len())?;
        if let Some(message) = failure {
            return Ok(Flow::Halt(HaltReason::CallbackFailure(message)));
        }
        self.write_back(&arena)?;
        if let Some(type_id) = return_type {
            let value = match type_id {
                TypeId::STRING => {
                    // SAFETY: a string-returning native hands back a wide string.
                    let text = unsafe { read_wide(raw) }?;
                    Value::String(self.pool_string(&text)?)
                }
                TypeId::FUNCTION => match self.adopt_native_function(raw) {
                    Ok(value) => value,
                    Err(err) => return halt_or_fatal(err),
                },
                _ => word_to_scalar(type_id, raw)?,
            };
            self.stack.push(value)?;
        }
        Ok(Flow::Continue)
    }

    fn marshal_argument(&mut self, arena: &mut CallArena, param: &VariableEntry, arg: Value) -> Result<u64> {
        let type_id = param.type_id;
        if param.is_reference {
            let reference = arg.as_reference()?;
            let current = self.read_reference(reference)?;
            return match type_id {
                t if is_word_scalar(t) => {
                    let (cell, address) = arena.cell(scalar_word(&current)?);
                    arena.write_backs.push(WriteBack::Scalar {
                        reference,
                        type_id,
                        cell,
                    });
                    Ok(address)
                }
                TypeId::STRING => Ok(arena.wide(&self.string(current.as_string_handle()?)?)),
                TypeId::BUFFER => {
                    let handle = current.as_buffer()?;
                    let (block, address) = arena.block(self.vm.buffers().get(handle)?.to_vec());
                    arena.write_backs.push(WriteBack::Buffer { handle, block });
                    Ok(address)
                }
                t if t.is_structure() => {
                    let (_, handle) = current.as_structure()?;
                    let layout = NativeLayout::of(self.program.types(), t)?;
                    let (block, address) = self.flatten_root(arena, &layout, handle)?;
                    arena.write_backs.push(WriteBack::Structure { handle, layout, block });
                    Ok(address)
                }
                other => Err(unsupported(format!("by-reference parameter of type {}", other))),
            };
        }

        let value = self.dereference(arg)?;
        match type_id {
            t if is_word_scalar(t) => scalar_word(&value),
            TypeId::STRING => Ok(arena.wide(&self.string(value.as_string_handle()?)?)),
            TypeId::BUFFER => {
                let bytes = self.vm.buffers().get(value.as_buffer()?)?.to_vec();
                Ok(arena.block(bytes).1)
            }
            TypeId::FUNCTION => {
                let name = value.as_string_handle()?;
                self.check_callback_signature(name)?;
                let address = self.callbacks.trampoline_for(name)?;
                Ok(address as u64)
            }
            t if t.is_structure() => {
                let (_, handle) = value.as_structure()?;
                let layout = NativeLayout::of(self.program.types(), t)?;
                Ok(self.flatten_root(arena, &layout, handle)?.1)
            }
            other => Err(unsupported(format!("parameter of type {}", other))),
        }
    }

    fn flatten_root(
        &mut self,
        arena: &mut CallArena,
        layout: &NativeLayout,
        handle: StructureHandle,
    ) -> Result<(usize, u64)> {
        let mut block = vec![0u8; layout.size];
        self.flatten(arena, layout, handle, &mut block, 0)?;
        Ok(arena.block(block))
    }

    fn flatten(
        &mut self,
        arena: &mut CallArena,
        layout: &NativeLayout,
        handle: StructureHandle,
        block: &mut [u8],
        base: usize,
    ) -> Result<()> {
        ensure!(!handle.is_none(), "cannot marshal a null structure handle");
        let members = self.vm.structures().get(handle)?.members().to_vec();
        for (field, member) in layout.fields.iter().zip(members) {
            let at = base + field.offset;
            match member {
                Value::Structure(_, nested) => {
                    let nested_layout = field
                        .nested
                        .as_deref()
                        .ok_or_else(|| anyhow!("structure value in a non-structure field"))?;
                    if !nested.is_none() {
                        self.flatten(arena, nested_layout, nested, block, at)?;
                    }
                }
                Value::Integer(v) => write_bytes(block, at, &v.to_le_bytes()),
                Value::Integer16(v) => write_bytes(block, at, &v.to_le_bytes()),
                Value::Integer64(v) => write_bytes(block, at, &v.to_le_bytes()),
                Value::Boolean(v) => write_bytes(block, at, &u32::from(v).to_le_bytes()),
                Value::Real(v) => write_bytes(block, at, &v.to_bits().to_le_bytes()),
                Value::String(h) => {
                    let address = arena.wide(&self.string(h)?) as usize;
                    write_bytes(block, at, &address.to_le_bytes());
                }
                Value::Buffer(h) => {
                    let bytes = self.vm.buffers().get(h)?.to_vec();
                    let address = arena.block(bytes).1 as usize;
                    write_bytes(block, at, &address.to_le_bytes());
                }
                Value::Function(h) => {
                    self.check_callback_signature(h)?;
                    let address = self.callbacks.trampoline_for(h)?;
                    write_bytes(block, at, &address.to_le_bytes());
                }
                other => return Err(unsupported(format!("structure member of type {}", other.type_id()))),
            }
        }
        Ok(())
    }

    fn write_back(&mut self, arena: &CallArena) -> Result<()> {
        for write_back in &arena.write_backs {
            match write_back {
                WriteBack::Scalar {
                    reference,
                    type_id,
                    cell,
                } => {
                    let value = word_to_scalar(*type_id, *arena.cells[*cell])?;
                    self.write_reference(*reference, value)?;
                }
                WriteBack::Buffer { handle, block } => {
                    let mut buffers = self.vm.buffers();
                    let buffer = buffers.get_mut(*handle)?;
                    buffer.clear();
                    buffer.extend_from_slice(&arena.blocks[*block]);
                }
                WriteBack::Structure { handle, layout, block } => {
                    self.read_back(layout, *handle, &arena.blocks[*block], 0)?;
                }
            }
        }
        Ok(())
    }

    /// Copies scalar fields of a flattened structure back into the instance.
    /// Strings, buffers and functions are left untouched.
    fn read_back(&self, layout: &NativeLayout, handle: StructureHandle, block: &[u8], base: usize) -> Result<()> {
        for (index, field) in layout.fields.iter().enumerate() {
            let at = base + field.offset;
            let value = match field.type_id {
                TypeId::INTEGER => Value::Integer(i32::from_le_bytes(read_array(block, at))),
                TypeId::INTEGER16 => Value::Integer16(i16::from_le_bytes(read_array(block, at))),
                TypeId::INTEGER64 => Value::Integer64(i64::from_le_bytes(read_array(block, at))),
                TypeId::BOOLEAN => Value::Boolean(u32::from_le_bytes(read_array(block, at)) != 0),
                TypeId::REAL => Value::Real(f32::from_bits(u32::from_le_bytes(read_array(block, at)))),
                t if t.is_structure() => {
                    let nested = self.vm.structures().get(handle)?.read_member(index)?.clone();
                    let (_, nested) = nested.as_structure()?;
                    if let Some(nested_layout) = field.nested.as_deref()
                        && !nested.is_none()
                    {
                        self.read_back(nested_layout, nested, block, at)?;
                    }
                    continue;
                }
                _ => continue,
            };
            self.vm.structures().get_mut(handle)?.write_member(index, value)?;
        }
        Ok(())
    }

    /// Rejects callbacks whose signature a trampoline cannot carry, before
    /// any native code sees them.
    fn check_callback_signature(&self, name: StringHandle) -> Result<()> {
        let display = self.string(name)?;
        let description = self
            .program
            .scope(name)
            .ok_or_else(|| unsupported(format!("callback {} has no declared signature", display)))?;
        let count = description.parameter_count();
        if count > MAX_CALLBACK_ARGS {
            return Err(unsupported(format!(
                "callback {} takes {} parameters (at most {})",
                display, count, MAX_CALLBACK_ARGS
            )));
        }
        let can_wrap = self.vm.jit_backend().is_some();
        for param in description.parameters() {
            if param.is_reference || !callback_parameter_supported(param.type_id, can_wrap) {
                return Err(unsupported(format!(
                    "callback {} parameter of type {}",
                    display, param.type_id
                )));
            }
        }
        if let Some(ret) = description.return_variable()
            && ret.type_id != TypeId::NOTHING
            && !is_word_scalar(ret.type_id)
        {
            return Err(unsupported(format!("callback {} return type {}", display, ret.type_id)));
        }
        Ok(())
    }

    /// Turns a native function pointer into a callable function value
    /// through the JIT backend's callback wrapper.
    pub(crate) fn adopt_native_function(&mut self, address: u64) -> Result<Value> {
        ensure!(address != 0, "native code returned a null function pointer");
        let entry = self
            .vm
            .wrap_native_callback(address as usize)
            .ok_or_else(|| unsupported(format!("native function at {:#x} has no callback wrapper", address)))?;
        let name = self.pool_string(&format!("native@{:#x}", address))?;
        self.wrapped_natives.insert(name, entry);
        trace!(target: "epoch::marshal", address, %name, "wrapped native function pointer");
        Ok(Value::Function(name))
    }

    /// Runs callback `name` for a trampoline. `args` points at the spilled
    /// argument registers.
    pub(crate) fn run_callback(&mut self, name: StringHandle, args: *const u64) -> Result<u64> {
        let program = self.program;
        let description = program
            .scope(name)
            .ok_or_else(|| anyhow!("callback {} has no scope description", name))?;
        let count = description.parameter_count();
        ensure!(
            count <= MAX_CALLBACK_ARGS,
            "callback {} takes {} parameters, trampolines forward {}",
            name,
            count,
            MAX_CALLBACK_ARGS
        );

        let mut values = Vec::with_capacity(count);
        for nth in 0..count {
            let variable = description.variable(description.parameter_slot(nth)?)?;
            // SAFETY: the trampoline spilled all six argument registers.
            let word = unsafe { *args.add(nth) };
            let value = match variable.type_id {
                TypeId::STRING => {
                    // SAFETY: a string parameter arrives as a wide string.
                    let text = unsafe { read_wide(word) }?;
                    Value::String(self.pool_string(&text)?)
                }
                TypeId::FUNCTION => self.adopt_native_function(word)?,
                other => word_to_scalar(other, word)?,
            };
            values.push(value);
        }

        let outcome = self.invoke_function(name, values)?;
        if let ExecutionResult::Halted(_) = outcome.result {
            // the halt is already pending on this context
            return Ok(0);
        }
        match outcome.value {
            Some(value) => scalar_word(&value.unwrap_sum()),
            None => Ok(0),
        }
    }
}
