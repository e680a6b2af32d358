use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{MethodEntry, Op};
use crate::{
    ast::{Expr, Intrinsic, MethodDefinition, NodeInfo},
    errors::{CompilationError, CompileResult, MemberKind},
    helper::interner::{IStr, Internable},
    layout::{LayoutEntry, LayoutID},
    types::{FieldType, MethodSignature, Qualifier},
};

/// Everything a body can name while it is being lowered.
pub struct Scope<'a> {
    pub owner: IStr,
    pub declared_in: LayoutID,
    pub this_offset: u32,
    pub frame_size: u32,

    /// Every field of the frame, with offsets relative to the root
    pub fields: &'a [LayoutEntry],

    /// The resolved method set, own declarations included, so bodies may call
    /// methods declared after them
    pub signatures: &'a FxHashMap<IStr, MethodSignature>,

    /// Entries of the extend parent, already placed in this frame. `None` when
    /// the literal extends nothing, in which case `base` does not exist.
    pub base: Option<&'a [Arc<MethodEntry>]>,
}

struct Lowering<'s, 'a> {
    scope: &'s Scope<'a>,
    def: &'s MethodDefinition,
    site: NodeInfo,
}

/// Lowers one method definition against `scope`, checking every name and
/// every statically known type along the way.
pub fn lower(def: &MethodDefinition, scope: &Scope) -> CompileResult<MethodEntry> {
    let l = Lowering {
        scope,
        def,
        site: NodeInfo::member(scope.owner, def.name),
    };

    let (body, ty) = l.expr(&def.body)?;
    l.expect(&ty, &def.returns)?;

    tracing::trace!("lowered {} as {:?}", l.site, body);

    Ok(MethodEntry {
        name: def.name,
        signature: def.signature(),
        body,
        declared_in: scope.declared_in,
        this_offset: scope.this_offset,
        frame_size: scope.frame_size,
    })
}

impl<'s, 'a> Lowering<'s, 'a> {
    /// `Any` is what the lowering knows nothing about, so it is let through
    /// here and checked by the evaluation backend instead.
    fn expect(&self, found: &FieldType, expected: &FieldType) -> CompileResult<()> {
        if *found == FieldType::Any || found.is_assignable_to(expected) {
            Ok(())
        } else {
            Err(CompilationError::TypeMismatch {
                site: self.site,
                expected: expected.clone(),
                found: found.clone(),
            })
        }
    }

    fn unresolved(&self, member: IStr, kind: MemberKind) -> CompilationError {
        CompilationError::UnresolvedMember {
            site: self.site,
            member,
            kind,
        }
    }

    fn field(&self, name: IStr) -> CompileResult<&'a LayoutEntry> {
        self.scope
            .fields
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| self.unresolved(name, MemberKind::Field))
    }

    fn args(&self, member: IStr, sig: &MethodSignature, args: &[Expr]) -> CompileResult<Vec<Op>> {
        if sig.arity() != args.len() {
            return Err(CompilationError::ArityMismatch {
                site: self.site,
                member,
                expected: sig.arity(),
                found: args.len(),
            });
        }

        args.iter()
            .zip(sig.params.iter())
            .map(|(a, ty)| -> CompileResult<Op> {
                let (op, found) = self.expr(a)?;
                self.expect(&found, ty)?;
                Ok(op)
            })
            .collect()
    }

    fn expr(&self, e: &Expr) -> CompileResult<(Op, FieldType)> {
        Ok(match e {
            Expr::Literal(v) => (Op::Const(v.clone()), v.type_of()),
            Expr::Param(name) => {
                let (index, (_, ty)) = self
                    .def
                    .params
                    .iter()
                    .enumerate()
                    .find(|(_, (n, _))| n == name)
                    .ok_or_else(|| self.unresolved(*name, MemberKind::Parameter))?;
                (Op::Param(index as u16), ty.clone())
            }
            Expr::Field(name) => {
                let entry = self.field(*name)?;
                (
                    Op::Load {
                        slot: entry.offset,
                        ty: entry.ty.clone(),
                    },
                    entry.ty.clone(),
                )
            }
            Expr::Store(name, value) => {
                let entry = self.field(*name)?;
                if entry.qualifier != Qualifier::Mut {
                    return Err(CompilationError::ImmutableStore {
                        site: self.site,
                        field: *name,
                    });
                }
                let (value, found) = self.expr(value)?;
                self.expect(&found, &entry.ty)?;
                (
                    Op::Store {
                        slot: entry.offset,
                        ty: entry.ty.clone(),
                        value: Box::new(value),
                    },
                    FieldType::Unit,
                )
            }
            Expr::SelfCall(method, args) => {
                let sig = self
                    .scope
                    .signatures
                    .get(method)
                    .ok_or_else(|| self.unresolved(*method, MemberKind::Method))?;
                (
                    Op::CallSelf {
                        method: *method,
                        args: self.args(*method, sig, args)?,
                    },
                    sig.returns.clone(),
                )
            }
            Expr::BaseCall(method, args) => {
                let target = self
                    .scope
                    .base
                    .and_then(|b| b.iter().find(|m| m.name == *method))
                    .ok_or_else(|| self.unresolved(*method, MemberKind::Base))?;
                (
                    Op::CallBase {
                        target: target.clone(),
                        args: self.args(*method, &target.signature, args)?,
                    },
                    target.signature.returns.clone(),
                )
            }
            Expr::Intrinsic(which, args) => self.intrinsic(*which, args)?,
            Expr::Project(of, index) => {
                let (op, ty) = self.expr(of)?;
                let bad = || CompilationError::BadProjection {
                    site: self.site,
                    index: *index,
                    found: ty.clone(),
                };
                let elem = match &ty {
                    FieldType::Tuple(elems) => {
                        elems.get(*index as usize).cloned().ok_or_else(bad)?
                    }
                    FieldType::Any => FieldType::Any,
                    _ => return Err(bad()),
                };
                (Op::Project(Box::new(op), *index), elem)
            }
            Expr::If(c, t, f) => {
                let (c, cty) = self.expr(c)?;
                self.expect(&cty, &FieldType::Bool)?;
                let (t, tty) = self.expr(t)?;
                let (f, fty) = self.expr(f)?;
                let ty = if tty == fty { tty } else { FieldType::Any };
                (Op::If(Box::new(c), Box::new(t), Box::new(f)), ty)
            }
            Expr::Seq(es) => {
                let mut ty = FieldType::Unit;
                let mut ops = Vec::with_capacity(es.len());
                for e in es {
                    let (op, t) = self.expr(e)?;
                    ops.push(op);
                    ty = t;
                }
                (Op::Seq(ops), ty)
            }
            Expr::RawSlot(index) => {
                if *index < 0 || *index >= self.scope.frame_size as i64 {
                    return Err(CompilationError::LayoutViolation {
                        site: self.site,
                        slot: *index,
                        frame_start: self.scope.this_offset,
                        frame_size: self.scope.frame_size,
                    });
                }
                (
                    Op::Load {
                        slot: self.scope.this_offset + *index as u32,
                        ty: FieldType::Any,
                    },
                    FieldType::Any,
                )
            }
        })
    }

    fn intrinsic(&self, which: Intrinsic, args: &[Expr]) -> CompileResult<(Op, FieldType)> {
        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(CompilationError::ArityMismatch {
                    site: self.site,
                    member: which.to_string().intern(),
                    expected,
                    found: args.len(),
                })
            }
        };

        let (operand, result) = match which {
            Intrinsic::Add | Intrinsic::Mul => (Some(FieldType::Int), FieldType::Int),
            Intrinsic::Sub => {
                arity(2)?;
                (Some(FieldType::Int), FieldType::Int)
            }
            Intrinsic::Concat => (Some(FieldType::Str), FieldType::Str),
            Intrinsic::Upper => {
                arity(1)?;
                (Some(FieldType::Str), FieldType::Str)
            }
            Intrinsic::Eq => {
                arity(2)?;
                (None, FieldType::Bool)
            }
            Intrinsic::Not => {
                arity(1)?;
                (Some(FieldType::Bool), FieldType::Bool)
            }
            Intrinsic::Tuple => (None, FieldType::Unit),
        };

        let mut ops = Vec::with_capacity(args.len());
        let mut types = Vec::with_capacity(args.len());
        for a in args {
            let (op, ty) = self.expr(a)?;
            if let Some(operand) = &operand {
                self.expect(&ty, operand)?;
            }
            ops.push(op);
            types.push(ty);
        }

        let result = match which {
            Intrinsic::Tuple => FieldType::Tuple(types),
            _ => result,
        };

        Ok((Op::Intrinsic(which, ops), result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::ErrorKind,
        layout::{LayoutEntry, LayoutID},
        types::Value,
    };

    fn entries() -> Vec<LayoutEntry> {
        vec![
            LayoutEntry::new("count", FieldType::Int, 4, Qualifier::Mut, None, 1),
            LayoutEntry::new("label", FieldType::Str, 5, Qualifier::Let, None, 1),
        ]
    }

    fn scope<'a>(
        fields: &'a [LayoutEntry],
        sigs: &'a FxHashMap<IStr, MethodSignature>,
    ) -> Scope<'a> {
        Scope {
            owner: "Counter".intern(),
            declared_in: LayoutID::test(9),
            this_offset: 4,
            frame_size: 2,
            fields,
            signatures: sigs,
            base: None,
        }
    }

    fn def(
        name: &str,
        params: Vec<(&str, FieldType)>,
        returns: FieldType,
        body: Expr,
    ) -> MethodDefinition {
        MethodDefinition {
            name: name.intern(),
            params: params.into_iter().map(|(n, t)| (n.intern(), t)).collect(),
            returns,
            body,
        }
    }

    #[test]
    fn fields_resolve_to_root_slots() {
        let fields = entries();
        let sigs = FxHashMap::default();
        let bump = def(
            "bump",
            vec![("by", FieldType::Int)],
            FieldType::Unit,
            Expr::store(
                "count",
                Expr::op(Intrinsic::Add, vec![Expr::field("count"), Expr::param("by")]),
            ),
        );

        let entry = lower(&bump, &scope(&fields, &sigs)).unwrap();
        assert_eq!(entry.this_offset, 4);
        assert_eq!(
            entry.body,
            Op::Store {
                slot: 4,
                ty: FieldType::Int,
                value: Box::new(Op::Intrinsic(
                    Intrinsic::Add,
                    vec![
                        Op::Load {
                            slot: 4,
                            ty: FieldType::Int
                        },
                        Op::Param(0)
                    ]
                )),
            }
        );
    }

    #[test]
    fn let_fields_cannot_be_stored() {
        let fields = entries();
        let sigs = FxHashMap::default();
        let rename = def("rename", vec![], FieldType::Unit, Expr::store("label", Expr::text("x")));

        let err = lower(&rename, &scope(&fields, &sigs)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableStoreError);
    }

    #[test]
    fn base_without_extend_is_unresolved() {
        let fields = entries();
        let sigs = FxHashMap::default();
        let up = def("up", vec![], FieldType::Str, Expr::base("up", vec![]));

        match lower(&up, &scope(&fields, &sigs)).unwrap_err() {
            CompilationError::UnresolvedMember { kind, .. } => assert_eq!(kind, MemberKind::Base),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn raw_slots_are_frame_relative_and_bounded() {
        let fields = entries();
        let sigs = FxHashMap::default();

        let peek = def("peek", vec![], FieldType::Any, Expr::RawSlot(1));
        let ok = lower(&peek, &scope(&fields, &sigs)).unwrap();
        assert_eq!(
            ok.body,
            Op::Load {
                slot: 5,
                ty: FieldType::Any
            }
        );

        let poke = def("poke", vec![], FieldType::Any, Expr::RawSlot(2));
        let err = lower(&poke, &scope(&fields, &sigs)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutViolationError);
    }

    #[test]
    fn return_types_are_checked() {
        let fields = entries();
        let sigs = FxHashMap::default();
        let wrong = def("wrong", vec![], FieldType::Int, Expr::lit(Value::str("nope")));

        assert_eq!(
            lower(&wrong, &scope(&fields, &sigs)).unwrap_err().kind(),
            ErrorKind::TypeMismatchError
        );
    }

    #[test]
    fn self_calls_check_arity() {
        let fields = entries();
        let mut sigs = FxHashMap::default();
        sigs.insert("get".intern(), MethodSignature::new([], FieldType::Int));

        let bad = def(
            "twice",
            vec![],
            FieldType::Int,
            Expr::call("get", vec![Expr::lit(Value::Int(1))]),
        );
        assert_eq!(
            lower(&bad, &scope(&fields, &sigs)).unwrap_err().kind(),
            ErrorKind::ArityMismatchError
        );
    }

    #[test]
    fn projections_past_the_tuple_are_rejected() {
        let fields = vec![LayoutEntry::new(
            "uri",
            FieldType::Tuple(vec![FieldType::Str, FieldType::Str]),
            4,
            Qualifier::Let,
            None,
            1,
        )];
        let sigs = FxHashMap::default();

        for index in [2, u32::MAX] {
            let far = def("far", vec![], FieldType::Str, Expr::project(Expr::field("uri"), index));
            match lower(&far, &scope(&fields, &sigs)).unwrap_err() {
                CompilationError::BadProjection { index: got, .. } => assert_eq!(got, index),
                other => panic!("unexpected {other:?}"),
            }
        }

        let scalar = def("scalar", vec![], FieldType::Int, Expr::project(Expr::field("count"), 0));
        let fields = entries();
        assert_eq!(
            lower(&scalar, &scope(&fields, &sigs)).unwrap_err().kind(),
            ErrorKind::BadProjectionError
        );
    }
}
