//! Turns a byte stream into a [`Program`].
//!
//! One decoding pass builds every table; two fixup passes then rewrite call
//! and dispatch targets. The loader assumes conforming input: anything it
//! cannot make sense of is a fatal error.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail, ensure};
use tracing::{debug, trace};

use crate::heap::StringHandle;
use crate::types::{ScopeDescription, StructureDefinition, TypeTables, VariantDefinition};
use crate::util::fast_map::{FastHashMap, FastHashSet, fast_hash_map_new, fast_hash_set_new};
use crate::vm::{VirtualMachine, tags};

use super::decode::decode_stream;
use super::instruction::Instruction;
use super::program::{ExternalBinding, Program};

pub const TAG_EXTERNAL: &str = "external";
pub const TAG_CONSTRUCTOR: &str = "constructor";
pub const TAG_NATIVE: &str = "native";

#[derive(Debug, Clone, Copy)]
enum Open {
    Entity { begin: usize, tag: u32 },
    Chain { begin: usize },
}

pub struct Loader<'vm> {
    vm: &'vm VirtualMachine,
}

impl<'vm> Loader<'vm> {
    pub fn new(vm: &'vm VirtualMachine) -> Self {
        Self { vm }
    }

    pub fn load(&self, bytes: &[u8]) -> Result<Program> {
        let decoded = decode_stream(bytes).context("malformed bytecode")?;
        let mut index_of_offset: FastHashMap<usize, usize> = fast_hash_map_new();
        let mut code = Vec::with_capacity(decoded.len());
        let mut byte_offsets = Vec::with_capacity(decoded.len());
        for (index, (offset, instruction)) in decoded.into_iter().enumerate() {
            index_of_offset.insert(offset, index);
            byte_offsets.push(offset);
            code.push(instruction);
        }

        let mut program = Program {
            code,
            byte_offsets,
            byte_len: bytes.len(),
            functions: fast_hash_map_new(),
            entity_ends: fast_hash_map_new(),
            chain_ends: fast_hash_map_new(),
            entity_chains: fast_hash_map_new(),
            scopes: fast_hash_map_new(),
            types: TypeTables::new(),
            externals: fast_hash_map_new(),
            constructors: fast_hash_set_new(),
            native_entries: fast_hash_map_new(),
            static_strings: fast_hash_set_new(),
        };

        let native_queue = self.scan(&mut program)?;
        self.validate_scopes(&program)?;
        self.accelerate(&mut program, &native_queue)?;
        self.resolve_targets(&mut program, &index_of_offset)?;
        self.rewrite_native_calls(&mut program);

        debug!(
            target: "epoch::loader",
            instructions = program.code.len(),
            functions = program.functions.len(),
            scopes = program.scopes.len(),
            externals = program.externals.len(),
            native = program.native_entries.len(),
            "program loaded"
        );
        Ok(program)
    }

    /// Decoding pass: strings, scopes, types, entity/chain maps, tags.
    /// Returns the functions tagged for native acceleration.
    fn scan(&self, program: &mut Program) -> Result<Vec<StringHandle>> {
        let strings = self.vm.strings();
        let mut open: Vec<Open> = Vec::new();
        let mut native_queue = Vec::new();

        for (index, instruction) in program.code.iter().enumerate() {
            match instruction {
                Instruction::PoolString { handle, text } => {
                    strings
                        .pool_with_handle(*handle, text)
                        .with_context(|| format!("instruction {}", index))?;
                    program.static_strings.insert(*handle);
                }
                Instruction::DefineLexicalScope {
                    name,
                    parent,
                    variables,
                } => {
                    let description = ScopeDescription::new(*name, *parent, variables.clone());
                    if program.scopes.insert(*name, Arc::new(description)).is_some() {
                        bail!("scope {} defined twice", self.display_name(*name));
                    }
                }
                Instruction::DefineStructure { type_id, members } => {
                    let definition = StructureDefinition::new(*type_id, members, &program.types)?;
                    program.types.insert_structure(definition)?;
                }
                Instruction::SumTypeDef { type_id, bases } => {
                    let definition = VariantDefinition::new(*type_id, bases, &program.types)?;
                    program.types.insert_variant(definition)?;
                }
                Instruction::BeginEntity { tag, name } => {
                    if tags::is_invocable(*tag) && program.functions.insert(*name, index).is_some() {
                        bail!("function {} defined twice", self.display_name(*name));
                    }
                    if let Some(Open::Chain { begin }) = open.last() {
                        program.entity_chains.insert(index, *begin);
                    }
                    open.push(Open::Entity { begin: index, tag: *tag });
                }
                Instruction::EndEntity => match open.pop() {
                    Some(Open::Entity { begin, .. }) => {
                        program.entity_ends.insert(begin, index);
                    }
                    _ => bail!("EndEntity at instruction {} has no matching BeginEntity", index),
                },
                Instruction::BeginChain => open.push(Open::Chain { begin: index }),
                Instruction::EndChain => match open.pop() {
                    Some(Open::Chain { begin }) => {
                        program.chain_ends.insert(begin, index);
                    }
                    _ => bail!("EndChain at instruction {} has no matching BeginChain", index),
                },
                Instruction::Tag { target, tag, params } => {
                    let tag_name = strings.get(*tag)?;
                    match &*tag_name {
                        TAG_EXTERNAL => {
                            ensure!(
                                params.len() == 2,
                                "external tag on {} needs library and symbol",
                                self.display_name(*target)
                            );
                            let binding = ExternalBinding {
                                library: strings.get(params[0])?.to_string(),
                                symbol: strings.get(params[1])?.to_string(),
                            };
                            program.externals.insert(*target, binding);
                        }
                        TAG_CONSTRUCTOR => {
                            program.constructors.insert(*target);
                        }
                        TAG_NATIVE => native_queue.push(*target),
                        other => {
                            trace!(target: "epoch::loader", tag = other, "ignoring unknown tag");
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(unclosed) = open.last() {
            match unclosed {
                Open::Entity { begin, tag } => bail!("entity (tag 0x{:x}) at instruction {} is never closed", tag, begin),
                Open::Chain { begin } => bail!("chain at instruction {} is never closed", begin),
            }
        }
        Ok(native_queue)
    }

    fn validate_scopes(&self, program: &Program) -> Result<()> {
        for description in program.scopes.values() {
            if let Some(parent) = description.parent()
                && !program.scopes.contains_key(&parent)
            {
                bail!(
                    "scope {} names unknown parent {}",
                    self.display_name(description.name()),
                    self.display_name(parent)
                );
            }
        }
        Ok(())
    }

    /// Submits tagged functions to the JIT backend and collects embedder
    /// registered native entries for names this program uses.
    fn accelerate(&self, program: &mut Program, queue: &[StringHandle]) -> Result<()> {
        if let Some(jit) = self.vm.jit_backend() {
            for name in queue {
                let begin = program
                    .function_entry(*name)
                    .ok_or_else(|| anyhow!("native tag on unknown function {}", self.display_name(*name)))?;
                let end = program.entity_end(begin)?;
                let text = self.vm.strings().get(*name)?;
                match jit.compile(&program.code, begin, end, &text) {
                    Some(entry) => {
                        program.native_entries.insert(*name, entry);
                    }
                    None => debug!(target: "epoch::loader", function = &*text, "JIT declined function"),
                }
            }
        }
        for (name, entry) in self.vm.native_entries() {
            if let Some(handle) = self.vm.strings().find(name)
                && program.static_strings.contains(&handle)
            {
                program.native_entries.insert(handle, Arc::clone(entry));
            }
        }
        Ok(())
    }

    /// Fixup pass (a): interpreted calls become direct jumps, byte offsets
    /// become instruction indices and dispatch targets are resolved.
    fn resolve_targets(&self, program: &mut Program, index_of_offset: &FastHashMap<usize, usize>) -> Result<()> {
        let known_elsewhere: FastHashSet<StringHandle> = program
            .externals
            .keys()
            .chain(program.native_entries.keys())
            .copied()
            .collect();

        for index in 0..program.code.len() {
            let rewritten = match &program.code[index] {
                Instruction::Invoke(name) => {
                    if known_elsewhere.contains(name) || self.is_library(*name)? {
                        None
                    } else {
                        let entry = program
                            .function_entry(*name)
                            .ok_or_else(|| anyhow!("call to unknown function {}", self.display_name(*name)))?;
                        Some(Instruction::InvokeOffset(entry))
                    }
                }
                Instruction::InvokeOffset(offset) => {
                    let entry = *index_of_offset
                        .get(offset)
                        .ok_or_else(|| anyhow!("invoke target byte offset {} is not an instruction boundary", offset))?;
                    match &program.code[entry] {
                        Instruction::BeginEntity { tag, .. } if tags::is_invocable(*tag) => {}
                        other => bail!("invoke target at byte offset {} is {}, not a function", offset, other.opcode()),
                    }
                    Some(Instruction::InvokeOffset(entry))
                }
                Instruction::InvokeMeta(name) => {
                    ensure!(
                        self.is_library(*name)?,
                        "meta invocation of unregistered library function {}",
                        self.display_name(*name)
                    );
                    None
                }
                Instruction::PatternMatch { target, patterns, .. } => Some(Instruction::PatternMatch {
                    target: *target,
                    entry: Some(self.dispatch_target(program, *target)?),
                    patterns: patterns.clone(),
                }),
                Instruction::TypeMatch { target, params, .. } => Some(Instruction::TypeMatch {
                    target: *target,
                    entry: Some(self.dispatch_target(program, *target)?),
                    params: params.clone(),
                }),
                _ => None,
            };
            if let Some(instruction) = rewritten {
                program.code[index] = instruction;
            }
        }
        Ok(())
    }

    /// Fixup pass (b): calls of natively compiled or registered functions
    /// go straight to `InvokeNative`.
    fn rewrite_native_calls(&self, program: &mut Program) {
        if program.native_entries.is_empty() {
            return;
        }
        let name_at_entry: FastHashMap<usize, StringHandle> =
            program.functions.iter().map(|(name, entry)| (*entry, *name)).collect();
        for instruction in program.code.iter_mut() {
            let name = match instruction {
                Instruction::Invoke(name) => Some(*name),
                Instruction::InvokeOffset(entry) => name_at_entry.get(entry).copied(),
                _ => None,
            };
            if let Some(name) = name
                && program.native_entries.contains_key(&name)
            {
                *instruction = Instruction::InvokeNative(name);
            }
        }
    }

    fn dispatch_target(&self, program: &Program, target: StringHandle) -> Result<usize> {
        let entry = program
            .function_entry(target)
            .ok_or_else(|| anyhow!("dispatch target {} is not a bytecode function", self.display_name(target)))?;
        match &program.code[entry] {
            Instruction::BeginEntity { tag, .. } if *tag == tags::FUNCTION => Ok(entry),
            _ => bail!("dispatch target {} is not a plain function", self.display_name(target)),
        }
    }

    fn is_library(&self, name: StringHandle) -> Result<bool> {
        let text = self.vm.strings().get(name)?;
        Ok(self.vm.library_function(&text).is_some())
    }

    fn display_name(&self, handle: StringHandle) -> String {
        match self.vm.strings().get(handle) {
            Ok(text) => format!("{:?}", &*text),
            Err(_) => handle.to_string(),
        }
    }
}
