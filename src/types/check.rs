use super::{FieldType, InterfaceConstraint, MethodSignature, Qualifier, Value};
use crate::{
    ast::{EdgeKind, FieldInit, ObjectLiteral, TargetExpr},
    errors::{CompilationError, CompileResult, MismatchReason, Requirement},
    helper::interner::IStr,
};

/// What the checker needs to know about one field of a candidate.
#[derive(Clone, Copy, Debug)]
pub struct FieldView<'a> {
    pub ty: &'a FieldType,
    pub qualifier: Qualifier,

    /// Present when the field resolves to a compile-time value
    pub constant: Option<&'a Value>,
}

/// Anything that can be matched structurally against an interface.
///
/// Implemented by object literals, which resolve names through their parents
/// the way flattening would, and by flattened layouts.
pub trait Shaped {
    fn label(&self) -> IStr;

    fn field_view(&self, name: IStr) -> Option<FieldView<'_>>;

    fn method_signature(&self, name: IStr) -> Option<MethodSignature>;
}

/// Checks `candidate` against every requirement of `iface`, fields first and
/// then methods, each in declaration order. Only the first unmet requirement
/// is reported.
pub fn satisfies<S: Shaped + ?Sized>(
    candidate: &S,
    iface: &InterfaceConstraint,
) -> CompileResult<()> {
    let fail = |requirement, reason| {
        Err(CompilationError::MissingCase {
            interface: iface.name,
            candidate: candidate.label(),
            requirement,
            reason,
        })
    };

    for req in iface.fields.iter() {
        let found = match candidate.field_view(req.name) {
            Some(f) => f,
            None => return fail(Requirement::Field(req.name), MismatchReason::Absent),
        };

        let type_mismatch = || MismatchReason::FieldType {
            expected: req.ty.clone(),
            found: found.ty.clone(),
        };

        match req.qualifier {
            Qualifier::Mut => {
                // writable fields are invariant: a write through the interface
                // must be storable in the candidate
                if found.qualifier != Qualifier::Mut {
                    return fail(Requirement::Field(req.name), MismatchReason::NotMutable);
                }
                if found.ty != &req.ty {
                    return fail(Requirement::Field(req.name), type_mismatch());
                }
            }
            Qualifier::Const => {
                if !found.ty.is_assignable_to(&req.ty) {
                    return fail(Requirement::Field(req.name), type_mismatch());
                }
                if found.qualifier != Qualifier::Const || found.constant.is_none() {
                    return fail(Requirement::Field(req.name), MismatchReason::NotConstant);
                }
            }
            Qualifier::Let => {
                if !found.ty.is_assignable_to(&req.ty) {
                    return fail(Requirement::Field(req.name), type_mismatch());
                }
            }
        }
    }

    for req in iface.methods.iter() {
        match candidate.method_signature(req.name) {
            None => return fail(Requirement::Method(req.name), MismatchReason::Absent),
            Some(found) if !found.satisfies(&req.signature) => {
                return fail(
                    Requirement::Method(req.name),
                    MismatchReason::Signature {
                        expected: req.signature.clone(),
                        found,
                    },
                )
            }
            Some(_) => (),
        }
    }

    tracing::trace!("{} satisfies {}", candidate.label(), iface.name);

    Ok(())
}

/// Presents `inner` under another name. Layouts are shared between every
/// object of the same shape, so this lets a diagnostic name the object that
/// was actually checked.
pub struct Named<'a, S: ?Sized> {
    pub label: IStr,
    pub inner: &'a S,
}

impl<'a, S: Shaped + ?Sized> Shaped for Named<'a, S> {
    fn label(&self) -> IStr {
        self.label
    }

    fn field_view(&self, name: IStr) -> Option<FieldView<'_>> {
        self.inner.field_view(name)
    }

    fn method_signature(&self, name: IStr) -> Option<MethodSignature> {
        self.inner.method_signature(name)
    }
}

/// Compile-time parents of `literal`, extend first, then mixins in order.
fn parents(literal: &ObjectLiteral) -> impl Iterator<Item = &ObjectLiteral> {
    let of = move |kind: EdgeKind| {
        literal
            .compositions()
            .filter(move |c| c.kind == kind)
            .filter_map(|c| match &c.target {
                TargetExpr::Object(parent) => Some(&**parent),
                TargetExpr::Runtime(_) => None,
            })
    };
    of(EdgeKind::Extend).chain(of(EdgeKind::Mixin))
}

/// Members the literal declares itself win; anything else is looked up in
/// its parents.
impl Shaped for ObjectLiteral {
    fn label(&self) -> IStr {
        self.name
    }

    fn field_view(&self, name: IStr) -> Option<FieldView<'_>> {
        match self.direct_fields().find(|f| f.name == name) {
            Some(f) => Some(FieldView {
                ty: &f.ty,
                qualifier: f.qualifier,
                constant: match &f.init {
                    FieldInit::Constant(v) => Some(v),
                    FieldInit::Deferred => None,
                },
            }),
            None => parents(self).find_map(|p| p.field_view(name)),
        }
    }

    fn method_signature(&self, name: IStr) -> Option<MethodSignature> {
        match self.direct_methods().find(|m| m.name == name) {
            Some(m) => Some(m.signature()),
            None => parents(self).find_map(|p| p.method_signature(name)),
        }
    }
}
