//! Method tables and the per call site choice of how to reach them.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use static_assertions::assert_impl_all;

use crate::{
    ast::NodeInfo,
    errors::{CompilationError, CompileResult, MemberKind},
    helper::{indent, interner::IStr},
    layout::{LayoutDescriptor, LayoutID},
    lir::MethodEntry,
    types::InterfaceConstraint,
};

/// The resolved method set of one concrete type.
#[derive(Debug)]
pub struct DispatchTable {
    pub layout: Arc<LayoutDescriptor>,
    methods: FxHashMap<IStr, Arc<MethodEntry>>,
    pub elision_eligible: bool,
}

assert_impl_all!(DispatchTable: Send, Sync);

impl DispatchTable {
    pub fn id(&self) -> LayoutID {
        self.layout.id
    }

    pub fn lookup(&self, method: IStr) -> Option<&Arc<MethodEntry>> {
        self.methods.get(&method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Entries in the layout's method order
    pub fn entries(&self) -> impl Iterator<Item = &Arc<MethodEntry>> {
        self.layout.methods.iter()
    }
}

impl std::fmt::Display for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "table {} ({}), {}",
            self.layout.label,
            self.id(),
            if self.elision_eligible { "elidable" } else { "boxed only" }
        )?;
        for m in self.entries() {
            writeln!(f, "{}{} -> {}@{}", indent(1), m.name, m.declared_in, m.this_offset)?;
        }
        Ok(())
    }
}

/// What a call site statically knows about its receiver.
#[derive(Clone, Debug)]
pub enum Receiver {
    /// The concrete type is known at compile time
    Monomorphized(LayoutID),

    /// Only an interface bound is known
    Constrained(Arc<InterfaceConstraint>),

    Dynamic,
}

#[derive(Clone, Debug)]
pub struct CallSite {
    pub receiver: Receiver,
    pub method: IStr,
}

#[derive(Clone, Debug)]
pub enum DispatchPlan {
    /// Go through the table pointer stored on the instance
    Boxed,

    /// The instance carries no table, this one is passed alongside it
    Elided { table: Arc<DispatchTable> },
}

impl DispatchPlan {
    pub fn is_elided(&self) -> bool {
        matches!(self, DispatchPlan::Elided { .. })
    }
}

pub struct DispatchCompiler {
    tables: DashMap<LayoutID, Arc<DispatchTable>>,
}

impl DispatchCompiler {
    pub fn new() -> Self {
        Self { tables: DashMap::new() }
    }

    /// Returns the table for `layout`, building it on first request. Layouts
    /// are already unique per shape, so a table is unique per shape as well.
    pub fn compile(&self, layout: &Arc<LayoutDescriptor>) -> Arc<DispatchTable> {
        self.tables
            .entry(layout.id)
            .or_insert_with(|| {
                tracing::debug!("building table for {} ({})", layout.label, layout.id);
                Arc::new(DispatchTable {
                    layout: layout.clone(),
                    methods: layout.methods.iter().map(|m| (m.name, m.clone())).collect(),
                    elision_eligible: layout.is_primitive_like(),
                })
            })
            .value()
            .clone()
    }

    pub fn table(&self, layout: LayoutID) -> Option<Arc<DispatchTable>> {
        self.tables.get(&layout).map(|t| t.value().clone())
    }

    /// Chooses how `site` reaches its method.
    ///
    /// Elision needs both a receiver whose concrete type is known here and a
    /// type with a single stored field. Everything else takes the boxed path,
    /// which is always correct.
    pub fn plan(&self, site: &CallSite) -> CompileResult<DispatchPlan> {
        match &site.receiver {
            Receiver::Monomorphized(id) => {
                let table = match self.table(*id) {
                    Some(t) => t,
                    None => {
                        tracing::warn!("no table for {id} yet, planning {} as boxed", site.method);
                        return Ok(DispatchPlan::Boxed);
                    }
                };

                if table.lookup(site.method).is_none() {
                    return Err(CompilationError::UnresolvedMember {
                        site: NodeInfo::member(table.layout.label, site.method),
                        member: site.method,
                        kind: MemberKind::Method,
                    });
                }

                if table.elision_eligible {
                    Ok(DispatchPlan::Elided { table })
                } else {
                    Ok(DispatchPlan::Boxed)
                }
            }
            Receiver::Constrained(iface) => {
                if !iface.methods.iter().any(|m| m.name == site.method) {
                    return Err(CompilationError::UnresolvedMember {
                        site: NodeInfo::member(iface.name, site.method),
                        member: site.method,
                        kind: MemberKind::Method,
                    });
                }
                Ok(DispatchPlan::Boxed)
            }
            Receiver::Dynamic => Ok(DispatchPlan::Boxed),
        }
    }
}

impl Default for DispatchCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Expr, FieldInit, ObjectLiteral},
        compose::GraphBuilder,
        errors::ErrorKind,
        helper::interner::Internable,
        layout::Flattener,
        types::{FieldType, Qualifier, Value},
    };

    fn compiled(lit: Arc<ObjectLiteral>, dc: &DispatchCompiler) -> Arc<DispatchTable> {
        let tree = GraphBuilder::new().build(&lit).unwrap();
        let desc = Flattener::new().flatten(&tree).unwrap();
        dc.compile(&desc)
    }

    fn wrapper() -> Arc<ObjectLiteral> {
        ObjectLiteral::new("Meters")
            .field("v", FieldType::Int, Qualifier::Let, FieldInit::Constant(Value::Int(0)))
            .method("get", vec![], FieldType::Int, Expr::field("v"))
            .finish()
    }

    #[test]
    fn single_field_types_elide_only_when_monomorphized() {
        let dc = DispatchCompiler::new();
        let table = compiled(wrapper(), &dc);
        assert!(table.elision_eligible);

        let mono = CallSite {
            receiver: Receiver::Monomorphized(table.id()),
            method: "get".intern(),
        };
        let dynamic = CallSite {
            receiver: Receiver::Dynamic,
            method: "get".intern(),
        };

        assert!(dc.plan(&mono).unwrap().is_elided());
        assert!(!dc.plan(&dynamic).unwrap().is_elided());
    }

    #[test]
    fn wider_types_stay_boxed() {
        let dc = DispatchCompiler::new();
        let lit = ObjectLiteral::new("Pair")
            .field("a", FieldType::Int, Qualifier::Let, FieldInit::Deferred)
            .field("b", FieldType::Int, Qualifier::Let, FieldInit::Deferred)
            .method("first", vec![], FieldType::Int, Expr::field("a"))
            .finish();
        let table = compiled(lit, &dc);

        let site = CallSite {
            receiver: Receiver::Monomorphized(table.id()),
            method: "first".intern(),
        };
        assert!(!table.elision_eligible);
        assert!(!dc.plan(&site).unwrap().is_elided());
    }

    #[test]
    fn unknown_methods_are_reported_at_the_site() {
        let dc = DispatchCompiler::new();
        let table = compiled(wrapper(), &dc);

        let site = CallSite {
            receiver: Receiver::Monomorphized(table.id()),
            method: "set".intern(),
        };
        assert_eq!(dc.plan(&site).unwrap_err().kind(), ErrorKind::UnresolvedMemberError);
    }

    #[test]
    fn tables_are_built_once_per_layout() {
        let dc = DispatchCompiler::new();
        let tree = GraphBuilder::new().build(&wrapper()).unwrap();
        let desc = Flattener::new().flatten(&tree).unwrap();

        assert!(Arc::ptr_eq(&dc.compile(&desc), &dc.compile(&desc)));
    }
}
