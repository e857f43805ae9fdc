//! One-byte opcodes.
//!
//! Operand shapes (all scalars little-endian, handles are `u32`):
//!
//! | opcode | operands |
//! |---|---|
//! | `Push` | type `u32`, literal sized by type (see below) |
//! | `Read`, `ReadRef`, `ReadRefAnnotated`, `SetRetVal`, `InvokeIndirect` | variable name |
//! | `ReadStack` | depth `u32` |
//! | `ReadParam` | parameter index `u32` |
//! | `Invoke`, `InvokeNative`, `InvokeMeta` | function name |
//! | `InvokeOffset` | byte offset `u32` of the callee's `BeginEntity` |
//! | `BeginEntity` | tag `u32`, name |
//! | `PoolString` | handle, NUL-terminated UTF-8 literal |
//! | `DefineLexicalScope` | name, parent (0 = none), count `u32`, count × (name, type `u32`, origin `u8`, is-ref `u8`) |
//! | `DefineStructure` | type `u32`, count `u32`, count × (member name, type `u32`) |
//! | `SumTypeDef` | type `u32`, count `u32`, count × base type `u32` |
//! | `BindRef` | frames `u32`, slot index `u32` |
//! | `BindMemberRef`, `BindMemberByHandle` | member name |
//! | `CopyFromStructure`, `CopyToStructure` | variable name, member name |
//! | `ConstructSumType` | variable name |
//! | `AllocStructure` | type `u32` |
//! | `PatternMatch` | target name, count `u32`, count × (type `u32`, kind `u8` 0 = any / 1 = literal, literal) |
//! | `TypeMatch` | target name, count `u32`, count × (type `u32`, by-ref `u8`) |
//! | `Tag` | target name, tag name, count `u32`, count × string handle |
//!
//! Every other opcode has no operands. Literal widths: nothing 0,
//! integer 4, integer16 2, integer64 8, boolean 1, real 4, string, function
//! and identifier handles 4.

use std::fmt;

use anyhow::{Result, anyhow};

macro_rules! opcodes {
    ($($name:ident = $byte:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $byte),*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            pub fn from_byte(byte: u8) -> Result<Opcode> {
                match byte {
                    $($byte => Ok(Opcode::$name),)*
                    other => Err(anyhow!("unknown opcode 0x{:02x}", other)),
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name)),*
                }
            }
        }
    };
}

opcodes! {
    Halt = 0x00,
    NoOp = 0x01,
    Push = 0x02,
    Pop = 0x03,
    Read = 0x04,
    ReadRef = 0x05,
    ReadRefAnnotated = 0x06,
    ReadStack = 0x07,
    ReadParam = 0x08,
    Assign = 0x09,
    AssignThroughIdentifier = 0x0a,
    AssignSumType = 0x0b,
    Invoke = 0x0c,
    InvokeOffset = 0x0d,
    InvokeIndirect = 0x0e,
    InvokeNative = 0x0f,
    InvokeMeta = 0x10,
    Return = 0x11,
    SetRetVal = 0x12,
    BeginEntity = 0x13,
    EndEntity = 0x14,
    BeginChain = 0x15,
    EndChain = 0x16,
    PoolString = 0x17,
    DefineLexicalScope = 0x18,
    DefineStructure = 0x19,
    SumTypeDef = 0x1a,
    BindRef = 0x1b,
    BindMemberRef = 0x1c,
    BindMemberByHandle = 0x1d,
    CopyFromStructure = 0x1e,
    CopyToStructure = 0x1f,
    CopyBuffer = 0x20,
    CopyStructure = 0x21,
    ConstructSumType = 0x22,
    AllocStructure = 0x23,
    PatternMatch = 0x24,
    TypeMatch = 0x25,
    Tag = 0x26,
    TempReferenceFromRegister = 0x27,
}

impl Opcode {
    #[inline]
    pub const fn byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
