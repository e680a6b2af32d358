pub mod check;
pub mod constraint;

pub use check::*;
pub use constraint::*;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use itertools::Itertools;
use smallvec::SmallVec;

/// The declared type of a stored field, parameter, or return value.
///
/// Every type knows how many storage slots it occupies once flattened into a
/// layout. Scalars take a single slot, tuples are laid out inline element by
/// element.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    Unit,
    Int,
    Float,
    Bool,
    Str,
    Tuple(Vec<FieldType>),

    /// Accepts anything, occupies one slot holding the whole value
    Any,
}

impl FieldType {
    pub fn size_in_slots(&self) -> u32 {
        match self {
            FieldType::Tuple(elems) => elems.iter().map(|e| e.size_in_slots()).sum::<u32>().max(1),
            _ => 1,
        }
    }

    /// Whether a value of type `self` may be used where `into` is expected.
    ///
    /// `Any` is the only widening, and tuples widen element by element.
    pub fn is_assignable_to(&self, into: &FieldType) -> bool {
        match (self, into) {
            (_, FieldType::Any) => true,
            (FieldType::Tuple(a), FieldType::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a.is_assignable_to(b))
            }
            (a, b) => a == b,
        }
    }

    /// Writes `value` into storage slots as laid out for this type.
    pub fn scatter(&self, value: &Value, into: &mut Vec<Value>) {
        match (self, value) {
            (FieldType::Tuple(elems), Value::Tuple(vals)) if !elems.is_empty() => {
                for (ty, v) in elems.iter().zip(vals.iter()) {
                    ty.scatter(v, into);
                }
            }
            (FieldType::Tuple(elems), _) if elems.is_empty() => into.push(Value::Unit),
            _ => into.push(value.clone()),
        }
    }

    /// Reads a value of this type back out of the slots `scatter` produced.
    pub fn gather(&self, slots: &[Value]) -> Value {
        match self {
            FieldType::Tuple(elems) if elems.is_empty() => Value::Tuple(Vec::new()),
            FieldType::Tuple(elems) => {
                let mut at = 0usize;
                let mut out = Vec::with_capacity(elems.len());
                for ty in elems {
                    let size = ty.size_in_slots() as usize;
                    out.push(ty.gather(&slots[at..at + size]));
                    at += size;
                }
                Value::Tuple(out)
            }
            _ => slots[0].clone(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Unit => write!(f, "()"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Str => write!(f, "Str"),
            FieldType::Any => write!(f, "Any"),
            FieldType::Tuple(elems) => write!(f, "({})", elems.iter().join(", ")),
        }
    }
}

/// How a field may be used.
///
/// `Const` fields carry a compile-time value that is part of the type itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Qualifier {
    #[strum(serialize = "const")]
    Const,
    #[strum(serialize = "let")]
    Let,
    #[strum(serialize = "mut")]
    Mut,
}

/// A literal value. These appear as field defaults, constants, method
/// arguments, and the results of the evaluation backend.
#[derive(Clone, Debug)]
pub enum Value {
    Unit,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Arc<str>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    /// The storage image of a field that was declared without a value.
    pub fn zero(ty: &FieldType) -> Value {
        match ty {
            FieldType::Unit | FieldType::Any => Value::Unit,
            FieldType::Int => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Bool => Value::Bool(false),
            FieldType::Str => Value::str(""),
            FieldType::Tuple(elems) => Value::Tuple(elems.iter().map(Value::zero).collect()),
        }
    }

    pub fn type_of(&self) -> FieldType {
        match self {
            Value::Unit => FieldType::Unit,
            Value::Int(_) => FieldType::Int,
            Value::Float(_) => FieldType::Float,
            Value::Bool(_) => FieldType::Bool,
            Value::Str(_) => FieldType::Str,
            Value::Tuple(vals) => FieldType::Tuple(vals.iter().map(Value::type_of).collect()),
        }
    }
}

// floats compare by bit pattern so values can sit inside structural keys
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Unit => (),
            Value::Int(i) => i.hash(state),
            Value::Float(fl) => fl.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Str(s) => s.hash(state),
            Value::Tuple(vals) => vals.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(fl) => write!(f, "{fl}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Tuple(vals) => write!(f, "({})", vals.iter().join(", ")),
        }
    }
}

/// Parameter and return types of a method, without names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub params: SmallVec<[FieldType; 4]>,
    pub returns: FieldType,
}

impl MethodSignature {
    pub fn new<I: IntoIterator<Item = FieldType>>(params: I, returns: FieldType) -> Self {
        Self {
            params: params.into_iter().collect(),
            returns,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// A candidate method may stand in for `required` when it takes at least
    /// what the requirement passes (contravariant parameters) and returns
    /// something the requirement accepts (covariant return).
    pub fn satisfies(&self, required: &MethodSignature) -> bool {
        self.arity() == required.arity()
            && required
                .params
                .iter()
                .zip(self.params.iter())
                .all(|(passed, accepted)| passed.is_assignable_to(accepted))
            && self.returns.is_assignable_to(&required.returns)
    }
}

impl std::fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}) -> {}", self.params.iter().join(", "), self.returns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuples_are_laid_out_inline() {
        let uri = FieldType::Tuple(vec![FieldType::Str, FieldType::Str, FieldType::Str]);
        assert_eq!(uri.size_in_slots(), 3);

        let nested = FieldType::Tuple(vec![FieldType::Int, uri.clone()]);
        assert_eq!(nested.size_in_slots(), 4);

        assert_eq!(FieldType::Tuple(vec![]).size_in_slots(), 1);
    }

    #[test]
    fn scatter_then_gather_nested_tuple() {
        let ty = FieldType::Tuple(vec![
            FieldType::Int,
            FieldType::Tuple(vec![FieldType::Str, FieldType::Bool]),
        ]);
        let v = Value::Tuple(vec![
            Value::Int(4),
            Value::Tuple(vec![Value::str("x"), Value::Bool(true)]),
        ]);

        let mut slots = Vec::new();
        ty.scatter(&v, &mut slots);

        assert_eq!(slots.len(), ty.size_in_slots() as usize);
        assert_eq!(slots[1], Value::str("x"));
        assert_eq!(ty.gather(&slots), v);
    }

    #[test]
    fn any_widens_but_nothing_else_does() {
        assert!(FieldType::Int.is_assignable_to(&FieldType::Any));
        assert!(!FieldType::Any.is_assignable_to(&FieldType::Int));
        assert!(!FieldType::Int.is_assignable_to(&FieldType::Float));
        assert!(FieldType::Tuple(vec![FieldType::Int])
            .is_assignable_to(&FieldType::Tuple(vec![FieldType::Any])));
    }

    #[test]
    fn method_signature_variance() {
        let takes_any = MethodSignature::new([FieldType::Any], FieldType::Str);
        let takes_int = MethodSignature::new([FieldType::Int], FieldType::Any);

        // accepting more than required is fine, returning less specific is not
        assert!(takes_any.satisfies(&MethodSignature::new([FieldType::Int], FieldType::Str)));
        assert!(!takes_int.satisfies(&MethodSignature::new([FieldType::Int], FieldType::Str)));
        assert!(!takes_any.satisfies(&MethodSignature::new([], FieldType::Str)));
    }

    #[test]
    fn floats_key_by_bits() {
        use rustc_hash::FxHasher;

        let hash = |v: &Value| {
            let mut h = FxHasher::default();
            v.hash(&mut h);
            h.finish()
        };

        assert_eq!(Value::Float(1.5), Value::Float(1.5));
        assert_eq!(hash(&Value::Float(1.5)), hash(&Value::Float(1.5)));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }
}
