//! Runtime values as they live on the operand stack, in scope slots, in the
//! Register and inside structure instances.

use std::fmt;

use anyhow::{Result, bail};

use crate::heap::{BufferHandle, StringHandle, StructureHandle};
use crate::types::TypeId;

/// A sum-typed value: the discriminant travels next to its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SumValue {
    pub family: TypeId,
    pub tag: TypeId,
    pub payload: Box<Value>,
}

impl SumValue {
    pub fn new(family: TypeId, tag: TypeId, payload: Value) -> Self {
        Self {
            family,
            tag,
            payload: Box::new(payload),
        }
    }
}

/// Storage location a [`Reference`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    /// Slot `index` of the active scope at position `scope` in the context's
    /// scope stack, valid while that scope keeps `generation`.
    Variable { scope: usize, index: usize, generation: u64 },
    Member { structure: StructureHandle, index: usize },
    Register,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub type_id: TypeId,
    pub target: RefTarget,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nothing,
    Integer(i32),
    Integer16(i16),
    Integer64(i64),
    Boolean(bool),
    Real(f32),
    String(StringHandle),
    Buffer(BufferHandle),
    Structure(TypeId, StructureHandle),
    Function(StringHandle),
    Identifier(StringHandle),
    Sum(SumValue),
    Reference(Reference),
}

/// A heap handle embedded in a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapRef {
    String(StringHandle),
    Buffer(BufferHandle),
    Structure(StructureHandle),
}

impl Value {
    /// Static type of the value. Sum values report their family, references
    /// the type of the referenced slot.
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Nothing => TypeId::NOTHING,
            Value::Integer(_) => TypeId::INTEGER,
            Value::Integer16(_) => TypeId::INTEGER16,
            Value::Integer64(_) => TypeId::INTEGER64,
            Value::Boolean(_) => TypeId::BOOLEAN,
            Value::Real(_) => TypeId::REAL,
            Value::String(_) => TypeId::STRING,
            Value::Buffer(_) => TypeId::BUFFER,
            Value::Structure(type_id, _) => *type_id,
            Value::Function(_) => TypeId::FUNCTION,
            Value::Identifier(_) => TypeId::IDENTIFIER,
            Value::Sum(sum) => sum.family,
            Value::Reference(reference) => reference.type_id,
        }
    }

    /// Concrete type after looking through a sum discriminant.
    pub fn runtime_type(&self) -> TypeId {
        match self {
            Value::Sum(sum) => sum.tag,
            other => other.type_id(),
        }
    }

    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Reference(_))
    }

    /// Strips a sum wrapper, leaving any other value untouched.
    pub fn unwrap_sum(self) -> Value {
        match self {
            Value::Sum(sum) => *sum.payload,
            other => other,
        }
    }

    pub fn as_integer(&self) -> Result<i32> {
        match self {
            Value::Integer(v) => Ok(*v),
            other => bail!("expected integer, found {}", other.type_id()),
        }
    }

    pub fn as_integer16(&self) -> Result<i16> {
        match self {
            Value::Integer16(v) => Ok(*v),
            other => bail!("expected integer16, found {}", other.type_id()),
        }
    }

    pub fn as_integer64(&self) -> Result<i64> {
        match self {
            Value::Integer64(v) => Ok(*v),
            other => bail!("expected integer64, found {}", other.type_id()),
        }
    }

    pub fn as_boolean(&self) -> Result<bool> {
        match self {
            Value::Boolean(v) => Ok(*v),
            other => bail!("expected boolean, found {}", other.type_id()),
        }
    }

    pub fn as_real(&self) -> Result<f32> {
        match self {
            Value::Real(v) => Ok(*v),
            other => bail!("expected real, found {}", other.type_id()),
        }
    }

    /// Handle of a string, function or identifier value.
    pub fn as_string_handle(&self) -> Result<StringHandle> {
        match self {
            Value::String(h) | Value::Function(h) | Value::Identifier(h) => Ok(*h),
            other => bail!("expected string handle, found {}", other.type_id()),
        }
    }

    pub fn as_buffer(&self) -> Result<BufferHandle> {
        match self {
            Value::Buffer(h) => Ok(*h),
            other => bail!("expected buffer, found {}", other.type_id()),
        }
    }

    pub fn as_structure(&self) -> Result<(TypeId, StructureHandle)> {
        match self {
            Value::Structure(t, h) => Ok((*t, *h)),
            other => bail!("expected structure, found {}", other.type_id()),
        }
    }

    pub fn as_reference(&self) -> Result<Reference> {
        match self {
            Value::Reference(r) => Ok(*r),
            other => bail!("expected reference, found {}", other.type_id()),
        }
    }

    /// Calls `visit` for every non-null heap handle held by this value,
    /// including handles inside sum payloads and member references.
    pub fn visit_handles(&self, visit: &mut dyn FnMut(HeapRef)) {
        match self {
            Value::String(h) | Value::Function(h) | Value::Identifier(h) if !h.is_none() => {
                visit(HeapRef::String(*h))
            }
            Value::Buffer(h) if !h.is_none() => visit(HeapRef::Buffer(*h)),
            Value::Structure(_, h) if !h.is_none() => visit(HeapRef::Structure(*h)),
            Value::Sum(sum) => sum.payload.visit_handles(visit),
            Value::Reference(Reference {
                target: RefTarget::Member { structure, .. },
                ..
            }) if !structure.is_none() => visit(HeapRef::Structure(*structure)),
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => f.write_str("nothing"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Integer16(v) => write!(f, "{}i16", v),
            Value::Integer64(v) => write!(f, "{}i64", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{:?}", v),
            Value::String(h) => write!(f, "{}", h),
            Value::Buffer(h) => write!(f, "{}", h),
            Value::Structure(t, h) => write!(f, "{}({})", t, h),
            Value::Function(h) => write!(f, "fn {}", h),
            Value::Identifier(h) => write!(f, "ident {}", h),
            Value::Sum(sum) => write!(f, "{}[{}: {}]", sum.family, sum.tag, sum.payload),
            Value::Reference(r) => match r.target {
                RefTarget::Variable { scope, index, .. } => write!(f, "&{} scope{}[{}]", r.type_id, scope, index),
                RefTarget::Member { structure, index } => write!(f, "&{} {}.{}", r.type_id, structure, index),
                RefTarget::Register => write!(f, "&{} register", r.type_id),
            },
        }
    }
}
