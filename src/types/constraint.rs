use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use super::{FieldType, MethodSignature, Qualifier};
use crate::helper::interner::IStr;

/// A named structural contract. Nothing ever declares that it implements one;
/// an object satisfies it purely by having the right fields and methods.
///
/// Requirements keep their declaration order, since a failed check reports
/// the first unmet one (fields before methods).
#[derive(Clone, Debug)]
pub struct InterfaceConstraint {
    pub name: IStr,
    pub fields: Vec<FieldRequirement>,
    pub methods: Vec<MethodRequirement>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRequirement {
    pub name: IStr,
    pub ty: FieldType,

    /// `Const` requires a compile-time value, `Mut` requires a writable field,
    /// `Let` only requires that the field can be read
    pub qualifier: Qualifier,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRequirement {
    pub name: IStr,
    pub signature: MethodSignature,
}

impl InterfaceConstraint {
    pub fn new<N: Into<IStr>>(name: N) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn field<N: Into<IStr>>(mut self, name: N, ty: FieldType, qualifier: Qualifier) -> Self {
        self.fields.push(FieldRequirement {
            name: name.into(),
            ty,
            qualifier,
        });
        self
    }

    pub fn method<N: Into<IStr>, P: IntoIterator<Item = FieldType>>(
        mut self,
        name: N,
        params: P,
        returns: FieldType,
    ) -> Self {
        self.methods.push(MethodRequirement {
            name: name.into(),
            signature: MethodSignature::new(params, returns),
        });
        self
    }

    /// Hash of the requirement shape. The interface name is left out, so two
    /// identically shaped interfaces share memoised satisfaction results.
    pub fn fingerprint(&self) -> u64 {
        let mut h = FxHasher::default();
        self.fields.hash(&mut h);
        self.methods.hash(&mut h);
        h.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_the_name() {
        let a = InterfaceConstraint::new("Quacks").method("quack", [], FieldType::Str);
        let b = InterfaceConstraint::new("Noisy").method("quack", [], FieldType::Str);
        let c =
            InterfaceConstraint::new("Quacks").method("quack", [FieldType::Int], FieldType::Str);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
