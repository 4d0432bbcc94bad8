//! Unresolved type references.
//!
//! The parser records type syntax as an owned tree and leaves resolution,
//! checking, and inference to downstream phases. A reference into the symbol
//! table (a UDT, enum, type variable, or function type) is stored by id.

use serde::{Deserialize, Serialize};

use crate::symbols::{EnumId, SfId, SymbolTable, TypeVarId, UdtId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnresolvedType {
    Int,
    Float,
    Str,
    Any,
    Void,
    Resource,
    Coroutine,
    /// `[T]`
    Vector(Box<UnresolvedType>),
    /// `T?`
    Nilable(Box<UnresolvedType>),
    /// A generic parameter in scope.
    TypeVar(TypeVarId),
    /// A user-defined type used without specializers.
    Udt(UdtId),
    /// A user-defined type with explicit specializers, `Name<T1, …>`.
    Spec {
        udt: UdtId,
        specializers: Vec<UnresolvedType>,
    },
    /// The type of a named function declared as a function type.
    FunType(SfId),
    Enum(EnumId),
    /// A multi-value return type, `A, B`.
    Tuple(Vec<UnresolvedType>),
}

impl UnresolvedType {
    /// The UDT behind a bare or specialized user-type reference.
    #[must_use]
    pub fn udt_of(&self) -> Option<UdtId> {
        match self {
            UnresolvedType::Udt(udt) | UnresolvedType::Spec { udt, .. } => Some(*udt),
            _ => None,
        }
    }

    /// Whether `T?` is a legal wrapping: only reference-like shapes can hold
    /// nil.
    #[must_use]
    pub fn is_nillable(&self) -> bool {
        matches!(
            self,
            UnresolvedType::Str
                | UnresolvedType::Resource
                | UnresolvedType::Coroutine
                | UnresolvedType::Vector(_)
                | UnresolvedType::Udt(_)
                | UnresolvedType::Spec { .. }
                | UnresolvedType::FunType(_)
                | UnresolvedType::Any
                | UnresolvedType::TypeVar(_)
        )
    }

    /// Number of values this type carries when used as a return type.
    #[must_use]
    pub fn num_values(&self) -> usize {
        match self {
            UnresolvedType::Void => 0,
            UnresolvedType::Tuple(ts) => ts.len(),
            _ => 1,
        }
    }

    /// Whether this reference still mentions an unbound generic: a type
    /// variable, or a user type that is itself still generic.
    #[must_use]
    pub fn is_generic(&self, st: &SymbolTable) -> bool {
        match self {
            UnresolvedType::TypeVar(_) => true,
            UnresolvedType::Udt(udt) => st.udts[udt.0 as usize].is_generic,
            UnresolvedType::Spec { udt, specializers } => {
                specializers.iter().any(|s| s.is_generic(st))
                    || (specializers.is_empty() && st.udts[udt.0 as usize].is_generic)
            }
            UnresolvedType::Vector(t) | UnresolvedType::Nilable(t) => t.is_generic(st),
            UnresolvedType::Tuple(ts) => ts.iter().any(|t| t.is_generic(st)),
            _ => false,
        }
    }
}
