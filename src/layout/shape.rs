use std::hash::{Hash, Hasher};
use std::sync::Arc;

use itertools::Itertools;
use rustc_hash::FxHasher;

use crate::{
    ast::{EdgeKind, FieldInit, MethodDefinition, ObjectLiteral},
    helper::interner::{IStr, SpurHelper},
    types::{FieldType, Qualifier, Value},
};

/// The structural identity of a composed type.
///
/// Two literals with the same key flatten to the same layout no matter what
/// they are called or which instances they were built from. The key nests:
/// each edge carries the parent's key rather than the parent itself.
#[derive(Debug)]
pub struct ShapeKey {
    fields: Vec<FieldShape>,

    /// Sorted by name so declaration order of methods does not matter
    methods: Vec<MethodDefinition>,

    /// In layout order, extend first
    edges: Vec<(EdgeKind, Arc<ShapeKey>)>,

    fingerprint: u64,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct FieldShape {
    name: IStr,
    ty: FieldType,
    qualifier: Qualifier,
    constant: Option<Value>,
}

impl ShapeKey {
    pub fn of<I>(literal: &ObjectLiteral, edges: I) -> ShapeKey
    where
        I: IntoIterator<Item = (EdgeKind, Arc<ShapeKey>)>,
    {
        let fields: Vec<FieldShape> = literal
            .direct_fields()
            .map(|f| FieldShape {
                name: f.name,
                ty: f.ty.clone(),
                qualifier: f.qualifier,
                // non-const defaults are per instance, not per type
                constant: match (&f.init, f.qualifier) {
                    (FieldInit::Constant(v), Qualifier::Const) => Some(v.clone()),
                    _ => None,
                },
            })
            .collect();

        let methods: Vec<MethodDefinition> = literal
            .direct_methods()
            .sorted_by(|a, b| a.name.resolve().cmp(b.name.resolve()))
            .cloned()
            .collect();

        let edges: Vec<(EdgeKind, Arc<ShapeKey>)> = edges.into_iter().collect();

        let mut h = FxHasher::default();
        fields.hash(&mut h);
        methods.hash(&mut h);
        for (kind, parent) in edges.iter() {
            kind.hash(&mut h);
            parent.fingerprint.hash(&mut h);
        }

        ShapeKey {
            fields,
            methods,
            edges,
            fingerprint: h.finish(),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn depth(&self) -> usize {
        1 + self.edges.iter().map(|(_, p)| p.depth()).max().unwrap_or(0)
    }
}

impl PartialEq for ShapeKey {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
            && self.fields == other.fields
            && self.methods == other.methods
            && self.edges.len() == other.edges.len()
            && self
                .edges
                .iter()
                .zip(other.edges.iter())
                .all(|((ka, pa), (kb, pb))| ka == kb && (Arc::ptr_eq(pa, pb) || pa == pb))
    }
}

impl Eq for ShapeKey {}

impl Hash for ShapeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn counter(name: &str, q: Qualifier) -> ObjectLiteral {
        ObjectLiteral::new(name)
            .field("count", FieldType::Int, q, FieldInit::Constant(Value::Int(0)))
            .method("get", vec![], FieldType::Int, Expr::field("count"))
    }

    #[test]
    fn names_do_not_matter_but_mutability_does() {
        let a = ShapeKey::of(&counter("A", Qualifier::Let), []);
        let b = ShapeKey::of(&counter("B", Qualifier::Let), []);
        let m = ShapeKey::of(&counter("A", Qualifier::Mut), []);

        assert_eq!(a, b);
        assert_ne!(a, m);
    }

    #[test]
    fn method_order_is_irrelevant() {
        let one = ObjectLiteral::new("One")
            .method("a", vec![], FieldType::Int, Expr::lit(Value::Int(1)))
            .method("b", vec![], FieldType::Int, Expr::lit(Value::Int(2)));
        let two = ObjectLiteral::new("Two")
            .method("b", vec![], FieldType::Int, Expr::lit(Value::Int(2)))
            .method("a", vec![], FieldType::Int, Expr::lit(Value::Int(1)));

        assert_eq!(ShapeKey::of(&one, []), ShapeKey::of(&two, []));
    }

    #[test]
    fn let_defaults_are_not_part_of_the_type() {
        let n = |q: Qualifier, v: i64| {
            let init = FieldInit::Constant(Value::Int(v));
            ObjectLiteral::new("X").field("n", FieldType::Int, q, init)
        };
        let with = |v| n(Qualifier::Let, v);
        let konst = |v| n(Qualifier::Const, v);

        assert_eq!(ShapeKey::of(&with(1), []), ShapeKey::of(&with(2), []));
        assert_ne!(ShapeKey::of(&konst(1), []), ShapeKey::of(&konst(2), []));
    }

    #[test]
    fn edges_nest() {
        let parent = Arc::new(ShapeKey::of(&counter("P", Qualifier::Let), []));
        let child = ShapeKey::of(&ObjectLiteral::new("C"), [(EdgeKind::Extend, parent.clone())]);
        let mixed = ShapeKey::of(&ObjectLiteral::new("C"), [(EdgeKind::Mixin, parent)]);

        assert_eq!(child.depth(), 2);
        assert_ne!(child, mixed);
    }
}
