use std::sync::Arc;

use either::Either;
use uuid::Uuid;

use super::Expr;
use crate::helper::interner::IStr;
use crate::types::{FieldType, MethodSignature, Qualifier, Value};

/// Identity of one constructed object value. Every construction gets a fresh
/// id; cloning the `Arc` that holds a literal aliases the same instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, derive_more::Display)]
#[display(fmt = "InstanceID({})", _0)]
pub struct InstanceID(Uuid);

impl InstanceID {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum EdgeKind {
    #[strum(serialize = "@Extend")]
    Extend,
    #[strum(serialize = "@Mixin")]
    Mixin,
}

/// A source-level object expression, after macro expansion.
///
/// `name` is only ever used for diagnostics. Two literals with different names
/// but the same members are the same type as far as the compiler cares.
#[derive(Clone, Debug)]
pub struct ObjectLiteral {
    pub name: IStr,
    id: InstanceID,
    pub items: Vec<Item>,
}

#[derive(Clone, Debug)]
pub enum Item {
    Member(Member),
    Compose(Composition),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Member {
    Field(FieldMember),
    Method(MethodDefinition),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldMember {
    pub name: IStr,
    pub ty: FieldType,
    pub qualifier: Qualifier,
    pub init: FieldInit,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldInit {
    /// A literal the front end already folded
    Constant(Value),

    /// Filled in later (constructor argument or runtime expression);
    /// storage starts at the type's zero value
    Deferred,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodDefinition {
    pub name: IStr,
    pub params: Vec<(IStr, FieldType)>,
    pub returns: FieldType,
    pub body: Expr,
}

impl MethodDefinition {
    pub fn signature(&self) -> MethodSignature {
        MethodSignature::new(self.params.iter().map(|(_, ty)| ty.clone()), self.returns.clone())
    }
}

/// One `@Extend(target) { members }` or `@Mixin(target) { members }` item.
///
/// The members in the block belong to the child, they are simply written next
/// to the parent they are most likely to override.
#[derive(Clone, Debug)]
pub struct Composition {
    pub kind: EdgeKind,
    pub target: TargetExpr,
    pub members: Vec<Member>,
}

#[derive(Clone, Debug)]
pub enum TargetExpr {
    /// An object value that was fully constructed at compile time
    Object(Arc<ObjectLiteral>),

    /// Anything else, kept only as a description for the diagnostic
    Runtime(IStr),
}

impl ObjectLiteral {
    pub fn new<N: Into<IStr>>(name: N) -> Self {
        Self {
            name: name.into(),
            id: InstanceID::fresh(),
            items: Vec::new(),
        }
    }

    pub fn id(&self) -> InstanceID {
        self.id
    }

    pub fn field<N: Into<IStr>>(
        mut self,
        name: N,
        ty: FieldType,
        qualifier: Qualifier,
        init: FieldInit,
    ) -> Self {
        self.items.push(Item::Member(Member::Field(FieldMember {
            name: name.into(),
            ty,
            qualifier,
            init,
        })));
        self
    }

    pub fn method<N: Into<IStr>>(
        mut self,
        name: N,
        params: Vec<(&str, FieldType)>,
        returns: FieldType,
        body: Expr,
    ) -> Self {
        self.items.push(Item::Member(Member::Method(MethodDefinition {
            name: name.into(),
            params: params.into_iter().map(|(n, ty)| (n.into(), ty)).collect(),
            returns,
            body,
        })));
        self
    }

    pub fn compose(mut self, kind: EdgeKind, target: TargetExpr, members: Vec<Member>) -> Self {
        self.items.push(Item::Compose(Composition { kind, target, members }));
        self
    }

    pub fn extend(self, parent: &Arc<ObjectLiteral>, members: Vec<Member>) -> Self {
        self.compose(EdgeKind::Extend, TargetExpr::Object(parent.clone()), members)
    }

    pub fn mixin(self, parent: &Arc<ObjectLiteral>, members: Vec<Member>) -> Self {
        self.compose(EdgeKind::Mixin, TargetExpr::Object(parent.clone()), members)
    }

    pub fn finish(self) -> Arc<ObjectLiteral> {
        Arc::new(self)
    }

    /// Every member this literal declares itself, including the ones written
    /// inside composition blocks, in declaration order.
    pub fn direct_members(&self) -> impl Iterator<Item = &Member> {
        self.items.iter().flat_map(|item| match item {
            Item::Member(m) => Either::Left(std::iter::once(m)),
            Item::Compose(c) => Either::Right(c.members.iter()),
        })
    }

    pub fn direct_fields(&self) -> impl Iterator<Item = &FieldMember> {
        self.direct_members().filter_map(|m| match m {
            Member::Field(f) => Some(f),
            Member::Method(_) => None,
        })
    }

    pub fn direct_methods(&self) -> impl Iterator<Item = &MethodDefinition> {
        self.direct_members().filter_map(|m| match m {
            Member::Method(d) => Some(d),
            Member::Field(_) => None,
        })
    }

    pub fn compositions(&self) -> impl Iterator<Item = &Composition> {
        self.items.iter().filter_map(|item| match item {
            Item::Compose(c) => Some(c),
            Item::Member(_) => None,
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.compositions().next().is_none()
    }
}

impl Member {
    pub fn name(&self) -> IStr {
        match self {
            Member::Field(f) => f.name,
            Member::Method(m) => m.name,
        }
    }

    pub fn method<N: Into<IStr>>(
        name: N,
        params: Vec<(&str, FieldType)>,
        returns: FieldType,
        body: Expr,
    ) -> Member {
        Member::Method(MethodDefinition {
            name: name.into(),
            params: params.into_iter().map(|(n, ty)| (n.into(), ty)).collect(),
            returns,
            body,
        })
    }

    pub fn field<N: Into<IStr>>(
        name: N,
        ty: FieldType,
        qualifier: Qualifier,
        init: FieldInit,
    ) -> Member {
        Member::Field(FieldMember {
            name: name.into(),
            ty,
            qualifier,
            init,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::interner::Internable;

    #[test]
    fn block_members_count_as_direct() {
        let duck = ObjectLiteral::new("Duck")
            .method("quack", vec![], FieldType::Str, Expr::text("quack"))
            .finish();

        let mad = ObjectLiteral::new("MadDuck")
            .field("rage", FieldType::Int, Qualifier::Let, FieldInit::Constant(Value::Int(9)))
            .extend(
                &duck,
                vec![Member::method("quack", vec![], FieldType::Str, Expr::base("quack", vec![]))],
            );

        let names: Vec<_> = mad.direct_members().map(Member::name).collect();
        assert_eq!(names, vec!["rage".intern(), "quack".intern()]);
        assert!(!mad.is_leaf());
        assert!(duck.is_leaf());
    }

    #[test]
    fn construction_is_unique_but_clone_aliases() {
        let make = || ObjectLiteral::new("Duck").finish();
        let a = make();
        let b = make();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
