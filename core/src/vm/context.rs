use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail, ensure};
use tracing::{debug, warn};

use crate::bytecode::Program;
use crate::error::{ExecutionResult, HaltReason};
use crate::frame::{ActiveScope, Register, StackSpace};
use crate::heap::gc::{self, GcKinds, GcReport, RootSet};
use crate::heap::{BufferHeap, StringHandle, StructureHeap};
use crate::marshal::CallbackRegistry;
use crate::types::TypeId;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::value::{RefTarget, Reference, SumValue, Value};

use super::exec::Flow;
use super::machine::{LibraryFunction, VirtualMachine};
use super::records::{CallRecord, ChainFrame, EntityFrame};
use super::jit::NativeEntryPoint;

/// Result of [`ExecutionContext::invoke_function`].
#[derive(Debug, Clone, PartialEq)]
pub struct NestedOutcome {
    pub result: ExecutionResult,
    /// The value the callee returned, if any.
    pub value: Option<Value>,
}

/// Where a call by name ends up.
pub(crate) enum CallTarget {
    Native(NativeEntryPoint),
    External,
    Library(LibraryFunction),
    Interpreted(usize),
}

/// One interpreter over a loaded [`Program`].
///
/// The scope chain, operand stack and Register are private to the context;
/// heaps are shared through the [`VirtualMachine`].
pub struct ExecutionContext<'vm> {
    pub(crate) vm: &'vm VirtualMachine,
    pub(crate) program: &'vm Program,
    pub(crate) scopes: Vec<ActiveScope>,
    pub(crate) stack: StackSpace,
    pub(crate) register: Register,
    pub(crate) calls: Vec<CallRecord>,
    pub(crate) entities: Vec<EntityFrame>,
    pub(crate) chains: Vec<ChainFrame>,
    pub(crate) offset: usize,
    /// Set between a call instruction and the callee's `BeginEntity`.
    pub(crate) pending_call: bool,
    /// Halt raised inside a nested invocation, reported by the outer loop.
    pub(crate) deferred_halt: Option<HaltReason>,
    pub(crate) callbacks: CallbackRegistry,
    /// Generation handed to the next scope entered.
    pub(crate) next_generation: u64,
    /// Native function pointers received from native code, wrapped by the
    /// JIT backend and callable under a pooled name.
    pub(crate) wrapped_natives: FastHashMap<StringHandle, NativeEntryPoint>,
}

impl<'vm> ExecutionContext<'vm> {
    pub fn new(vm: &'vm VirtualMachine, program: &'vm Program) -> Self {
        Self {
            vm,
            program,
            scopes: Vec::new(),
            stack: StackSpace::new(vm.config().max_stack_depth),
            register: Register::new(),
            calls: Vec::new(),
            entities: Vec::new(),
            chains: Vec::new(),
            offset: 0,
            pending_call: false,
            deferred_halt: None,
            callbacks: CallbackRegistry::new(),
            next_generation: 1,
            wrapped_natives: fast_hash_map_new(),
        }
    }

    /// Runs the program from its first instruction.
    pub fn execute(&mut self) -> Result<ExecutionResult> {
        self.offset = 0;
        self.run(false)
    }

    #[inline]
    pub fn vm(&self) -> &'vm VirtualMachine {
        self.vm
    }

    #[inline]
    pub fn program(&self) -> &'vm Program {
        self.program
    }

    #[inline]
    pub fn stack(&self) -> &StackSpace {
        &self.stack
    }

    #[inline]
    pub fn stack_mut(&mut self) -> &mut StackSpace {
        &mut self.stack
    }

    #[inline]
    pub fn register(&self) -> &Register {
        &self.register
    }

    #[inline]
    pub fn register_mut(&mut self) -> &mut Register {
        &mut self.register
    }

    #[inline]
    pub fn scopes(&self) -> &[ActiveScope] {
        &self.scopes
    }

    /// Index of the next instruction to execute.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn push(&mut self, value: Value) -> Result<()> {
        self.stack.push(value)
    }

    /// Pops the top operand, looking through references.
    pub fn pop(&mut self) -> Result<Value> {
        let value = self.stack.pop()?;
        self.dereference(value)
    }

    /// Pops `count` operands in push order, looking through references.
    pub fn pop_args(&mut self, count: usize) -> Result<Vec<Value>> {
        let raw = self.stack.pop_many(count)?;
        raw.into_iter().map(|value| self.dereference(value)).collect()
    }

    pub fn string(&self, handle: StringHandle) -> Result<Arc<str>> {
        self.vm.strings().get(handle)
    }

    /// Interns `text` into the shared pool.
    pub fn pool_string(&self, text: &str) -> Result<StringHandle> {
        self.vm.strings().pool(text)
    }

    pub fn buffers(&self) -> std::sync::MutexGuard<'vm, BufferHeap> {
        self.vm.buffers()
    }

    pub fn structures(&self) -> std::sync::MutexGuard<'vm, StructureHeap> {
        self.vm.structures()
    }

    /// Stops the run after the current instruction.
    pub fn request_halt(&mut self, reason: HaltReason) {
        self.deferred_halt.get_or_insert(reason);
    }

    pub(super) fn run(&mut self, nested: bool) -> Result<ExecutionResult> {
        let program: &'vm Program = self.program;
        let code = program.code();
        loop {
            self.collect_garbage_if_due();
            let at = self.offset;
            let Some(instruction) = code.get(at) else {
                ensure!(!nested, "nested invocation ran past the end of the program");
                return Ok(ExecutionResult::Ok);
            };
            self.offset += 1;
            let flow = self
                .step(at, instruction)
                .with_context(|| format!("instruction {} ({})", at, instruction.opcode()))?;
            match flow {
                Flow::Continue => {}
                Flow::Exit => return Ok(ExecutionResult::Ok),
                Flow::Halt(reason) => {
                    warn!(target: "epoch::vm", offset = at, %reason, "execution halted");
                    return Ok(ExecutionResult::Halted(reason));
                }
            }
            if let Some(reason) = self.deferred_halt.take() {
                warn!(target: "epoch::vm", offset = at, %reason, "execution halted");
                return Ok(ExecutionResult::Halted(reason));
            }
        }
    }

    /// Calls `name` with `args` and runs it to completion on this context,
    /// as library functions and callbacks do. A halt inside the callee is
    /// also reported to the enclosing run.
    pub fn invoke_function(&mut self, name: StringHandle, args: Vec<Value>) -> Result<NestedOutcome> {
        let base = self.stack.len();
        let saved_offset = self.offset;
        let depths = (self.scopes.len(), self.entities.len(), self.chains.len(), self.calls.len());
        for arg in args {
            self.stack.push(arg)?;
        }

        let result = match self.resolve_call(name)? {
            CallTarget::Interpreted(entry) => {
                self.call_interpreted(entry, true)?;
                self.run(true)?
            }
            _ => match self.invoke_by_name(name)? {
                Flow::Halt(reason) => ExecutionResult::Halted(reason),
                _ => ExecutionResult::Ok,
            },
        };
        self.offset = saved_offset;

        match result {
            ExecutionResult::Ok => {
                let value = if self.stack.len() > base { Some(self.pop()?) } else { None };
                self.stack.truncate(base);
                Ok(NestedOutcome {
                    result: ExecutionResult::Ok,
                    value,
                })
            }
            ExecutionResult::Halted(reason) => {
                let (scopes, entities, chains, calls) = depths;
                self.stack.truncate(base);
                self.scopes.truncate(scopes);
                self.entities.truncate(entities);
                self.chains.truncate(chains);
                self.calls.truncate(calls);
                self.pending_call = false;
                self.request_halt(reason.clone());
                Ok(NestedOutcome {
                    result: ExecutionResult::Halted(reason),
                    value: None,
                })
            }
        }
    }

    pub(crate) fn resolve_call(&self, name: StringHandle) -> Result<CallTarget> {
        if let Some(entry) = self.wrapped_natives.get(&name) {
            return Ok(CallTarget::Native(Arc::clone(entry)));
        }
        if let Some(entry) = self.program.native_entry(name) {
            return Ok(CallTarget::Native(Arc::clone(entry)));
        }
        if self.program.external(name).is_some() {
            return Ok(CallTarget::External);
        }
        let text = self.vm.strings().get(name)?;
        if let Some(function) = self.vm.library_function(&text) {
            return Ok(CallTarget::Library(function));
        }
        match self.program.function_entry(name) {
            Some(entry) => Ok(CallTarget::Interpreted(entry)),
            None => bail!("call to unknown function {:?}", &*text),
        }
    }

    pub(super) fn invoke_by_name(&mut self, name: StringHandle) -> Result<Flow> {
        match self.resolve_call(name)? {
            CallTarget::Native(entry) => self.invoke_native_entry(&entry),
            CallTarget::External => {
                let program: &'vm Program = self.program;
                let binding = program
                    .external(name)
                    .ok_or_else(|| anyhow!("external binding for {} vanished", name))?;
                self.call_external(name, binding)
            }
            CallTarget::Library(function) => {
                function(self)?;
                Ok(Flow::Continue)
            }
            CallTarget::Interpreted(entry) => self.call_interpreted(entry, false),
        }
    }

    pub(super) fn invoke_native_entry(&mut self, entry: &NativeEntryPoint) -> Result<Flow> {
        entry(&mut self.stack).context("native entry point failed")?;
        Ok(Flow::Continue)
    }

    pub(super) fn call_interpreted(&mut self, entry: usize, return_on_exit: bool) -> Result<Flow> {
        let limit = self.vm.config().max_call_depth;
        ensure!(self.calls.len() < limit, "call depth limit of {} exceeded", limit);
        self.calls.push(CallRecord {
            return_to: self.offset,
            scope_depth: self.scopes.len(),
            entity_depth: self.entities.len(),
            chain_depth: self.chains.len(),
            saved_register: self.register.take(),
            return_on_exit,
        });
        self.pending_call = true;
        self.offset = entry;
        Ok(Flow::Continue)
    }

    /// Unwinds to the innermost call record, pushes the callee's Register
    /// value and resumes the caller. A return with no caller ends the run.
    pub(super) fn return_from_call(&mut self) -> Result<Flow> {
        let Some(record) = self.calls.pop() else {
            return Ok(Flow::Exit);
        };
        self.scopes.truncate(record.scope_depth);
        self.entities.truncate(record.entity_depth);
        self.chains.truncate(record.chain_depth);
        if let Some(value) = self.register.take() {
            self.stack.push(value)?;
        }
        if let Some(saved) = record.saved_register {
            self.register.set(saved);
        }
        if record.return_on_exit {
            return Ok(Flow::Exit);
        }
        self.offset = record.return_to;
        Ok(Flow::Continue)
    }

    /// Enters `scope` under a fresh generation.
    pub(crate) fn push_scope(&mut self, scope: ActiveScope) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.scopes.push(scope.with_generation(generation));
    }

    /// Target naming slot `index` of the scope at `scope` as it is now.
    pub(crate) fn variable_target(&self, scope: usize, index: usize) -> Result<RefTarget> {
        let active = self
            .scopes
            .get(scope)
            .ok_or_else(|| anyhow!("no active scope at position {}", scope))?;
        Ok(RefTarget::Variable {
            scope,
            index,
            generation: active.generation(),
        })
    }

    /// The scope a variable reference was taken from, provided it is still
    /// active.
    pub(crate) fn referenced_scope(&self, scope: usize, generation: u64) -> Result<&ActiveScope> {
        match self.scopes.get(scope) {
            Some(active) if active.generation() == generation => Ok(active),
            _ => bail!("reference to scope {} outlived it", scope),
        }
    }

    /// Finds `name` in the current scope or one of its lexical parents.
    /// Returns `(scope position, slot index)`.
    pub(crate) fn lookup_variable(&self, name: StringHandle) -> Result<(usize, usize)> {
        let mut cursor = self.scopes.len().checked_sub(1);
        while let Some(position) = cursor {
            let scope = &self.scopes[position];
            if let Some(index) = scope.description().index_of(name) {
                return Ok((position, index));
            }
            cursor = scope.parent();
        }
        bail!("unknown variable {:?}", &*self.vm.strings().get(name)?)
    }

    /// Current value of a variable with references resolved.
    pub fn read_variable(&self, name: StringHandle) -> Result<Value> {
        let (scope, index) = self.lookup_variable(name)?;
        let value = self.scopes[scope].slot(index)?.clone();
        self.dereference(value)
    }

    pub fn write_variable(&mut self, name: StringHandle, value: Value) -> Result<()> {
        let (scope, index) = self.lookup_variable(name)?;
        let type_id = self.scopes[scope].description().variable(index)?.type_id;
        let target = self.variable_target(scope, index)?;
        self.write_reference(Reference { type_id, target }, value)
    }

    pub(crate) fn dereference(&self, value: Value) -> Result<Value> {
        match value {
            Value::Reference(reference) => self.read_reference(reference),
            other => Ok(other),
        }
    }

    pub(crate) fn read_reference(&self, reference: Reference) -> Result<Value> {
        let value = match reference.target {
            RefTarget::Variable {
                scope,
                index,
                generation,
            } => self.referenced_scope(scope, generation)?.slot(index)?.clone(),
            RefTarget::Member { structure, index } => self.vm.structures().get(structure)?.read_member(index)?.clone(),
            RefTarget::Register => self.register.get().cloned().unwrap_or_default(),
        };
        // a bound reference slot forwards to its referent
        match value {
            Value::Reference(inner) => self.read_reference(inner),
            other => Ok(other),
        }
    }

    /// Stores `value` at the referenced location, coercing it to the
    /// location's declared type.
    pub(crate) fn write_reference(&mut self, reference: Reference, value: Value) -> Result<()> {
        let value = self.dereference(value)?;
        match reference.target {
            RefTarget::Variable {
                scope,
                index,
                generation,
            } => {
                let active = self.referenced_scope(scope, generation)?;
                if let Value::Reference(inner) = active.slot(index)? {
                    let inner = *inner;
                    return self.write_reference(inner, value);
                }
                let declared = active.description().variable(index)?.type_id;
                let value = self.coerce(declared, value)?;
                self.scopes[scope].set_slot(index, value)
            }
            RefTarget::Member { structure, index } => {
                let declared = self.vm.structures().get(structure)?.read_member(index)?.type_id();
                let value = self.coerce(declared, value)?;
                self.vm.structures().get_mut(structure)?.write_member(index, value)
            }
            RefTarget::Register => {
                self.register.set(value);
                Ok(())
            }
        }
    }

    /// Converts `value` for storage in a slot of type `target`: base values
    /// are wrapped into a sum family containing them, sums are unwrapped
    /// when the slot expects their current base type.
    pub(crate) fn coerce(&self, target: TypeId, value: Value) -> Result<Value> {
        let actual = value.type_id();
        if actual == target {
            return Ok(value);
        }
        if target.is_sum_type() {
            let variant = self.program.types().variant(target)?;
            let base = value.runtime_type();
            ensure!(
                variant.contains(base),
                "type mismatch: {} is not a member of sum type {}",
                base,
                target
            );
            return Ok(Value::Sum(SumValue::new(target, base, value.unwrap_sum())));
        }
        if let Value::Sum(sum) = &value
            && sum.tag == target
        {
            return Ok(value.unwrap_sum());
        }
        bail!("type mismatch: expected {}, found {}", target, actual)
    }

    /// Collects every heap kind whose allocation ticks passed its threshold.
    fn collect_garbage_if_due(&mut self) {
        let config = self.vm.config();
        if !config.gc_enabled {
            return;
        }
        let kinds = GcKinds {
            strings: self.vm.strings().ticks() > config.string_gc_threshold,
            buffers: self.vm.buffers().ticks() > config.buffer_gc_threshold,
            structures: self.vm.structures().ticks() > config.structure_gc_threshold,
        };
        if kinds.any() {
            self.collect_garbage(kinds);
        }
    }

    /// Runs the requested collectors against this context's roots: every
    /// active scope, the operand stack, the Register, the Register values
    /// saved by pending calls and the names of wrapped native functions.
    pub fn collect_garbage(&mut self, kinds: GcKinds) -> GcReport {
        let mut roots = RootSet::gather(&self.scopes, &self.stack, &self.register);
        for call in &self.calls {
            if let Some(saved) = &call.saved_register {
                roots.add_value(saved);
            }
        }
        for name in self.wrapped_natives.keys() {
            roots.add_value(&Value::Function(*name));
        }

        let mut report = GcReport::default();
        let mut buffers = self.vm.buffers();
        let mut structures = self.vm.structures();
        if kinds.structures {
            report.structures = gc::collect_structures(&mut structures, &roots);
        }
        if kinds.strings {
            report.strings =
                gc::collect_strings(self.vm.strings(), &roots, &structures, self.program.static_strings());
        }
        if kinds.buffers {
            report.buffers = gc::collect_buffers(&mut buffers, &roots, &structures);
        }
        debug!(
            target: "epoch::gc",
            strings = report.strings,
            buffers = report.buffers,
            structures = report.structures,
            "collection finished"
        );
        report
    }
}
