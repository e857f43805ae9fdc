//! Bytecode format: opcodes, decoded instructions, the assembler and the
//! loader producing executable [`Program`]s.

mod decode;
mod instruction;
mod loader;
mod opcode;
mod program;
mod writer;


pub use decode::{decode_instruction, decode_stream};
pub use instruction::{Instruction, ParamPattern, TypeParam};
pub use loader::{Loader, TAG_CONSTRUCTOR, TAG_EXTERNAL, TAG_NATIVE};
pub use opcode::Opcode;
pub use program::{
    ExternalBinding, ExternalSummary, FunctionSummary, MemberSummary, Program, ProgramSummary, StructureSummary,
    SumTypeSummary,
};
pub use writer::{BytecodeWriter, encode_instruction};
