//! The compilation pipeline: composition graph, layout, tables, and the
//! checks made at call boundaries.

pub mod stager;

pub use stager::{launch, parse_args, CFlags};

use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;
use static_assertions::assert_impl_all;

use crate::{
    ast::{NodeInfo, ObjectLiteral},
    compose::GraphBuilder,
    dispatch::{CallSite, DispatchCompiler, DispatchPlan, DispatchTable, Receiver},
    errors::{CompilationError, CompileResult},
    exec::{Instance, Machine},
    helper::interner::{IStr, Internable},
    layout::{Flattener, LayoutDescriptor, LayoutID},
    types::{satisfies, InterfaceConstraint, Named, Value},
};

/// Everything produced for one compiled root: the shared layout and table of
/// its concrete type, plus the initial storage of this particular object.
#[derive(Clone, Debug)]
pub struct CompiledObject {
    pub label: IStr,
    pub descriptor: Arc<LayoutDescriptor>,
    pub table: Arc<DispatchTable>,
    pub image: Vec<Value>,
}

impl CompiledObject {
    pub fn id(&self) -> LayoutID {
        self.descriptor.id
    }

    /// A fresh instance in the representation `plan` calls for. An elided
    /// plan must carry this object's own table.
    pub fn instantiate(&self, plan: &DispatchPlan) -> CompileResult<Instance> {
        match plan {
            DispatchPlan::Boxed => Ok(self.boxed()),
            DispatchPlan::Elided { table } if table.id() != self.id() => {
                Err(CompilationError::runtime(format!(
                    "a plan for {} cannot instantiate `{}` ({})",
                    table.id(),
                    self.label,
                    self.id()
                )))
            }
            DispatchPlan::Elided { .. } => self.elided(),
        }
    }

    pub fn boxed(&self) -> Instance {
        Instance::boxed(self.table.clone(), self.image.clone())
    }

    /// Only types whose table may be passed alongside can drop it.
    pub fn elided(&self) -> CompileResult<Instance> {
        if !self.table.elision_eligible {
            return Err(CompilationError::runtime(format!(
                "`{}` has {} stored fields and must carry its table",
                self.label,
                self.descriptor.entries.len()
            )));
        }
        Ok(Instance::elided(self.id(), self.image.clone()))
    }
}

/// The declared type of a parameter at a call boundary.
#[derive(Clone, Debug)]
pub enum ParamType {
    /// Exactly this concrete type
    Concrete(LayoutID),

    /// Anything structurally satisfying the interface
    Constrained(Arc<InterfaceConstraint>),

    Dynamic,
}

/// One compilation session. Shared by reference between worker threads;
/// every cache inside is safe to fill concurrently.
pub struct Session {
    graph: GraphBuilder,
    flattener: Flattener,
    dispatch: DispatchCompiler,
    machine: Machine,

    /// (layout, interface fingerprint) -> satisfied
    satisfied: DashMap<(LayoutID, u64), bool>,
}

assert_impl_all!(Session: Send, Sync);

impl Session {
    pub fn new() -> Self {
        Self {
            graph: GraphBuilder::new(),
            flattener: Flattener::new(),
            dispatch: DispatchCompiler::new(),
            machine: Machine::new(),
            satisfied: DashMap::new(),
        }
    }

    #[tracing::instrument(skip(self, root), fields(object = %root.name))]
    pub fn compile(&self, root: &Arc<ObjectLiteral>) -> CompileResult<CompiledObject> {
        let tree = self.graph.build(root)?;
        let descriptor = self.flattener.flatten(&tree)?;
        let image = self.flattener.image(&tree, &descriptor)?;
        let table = self.dispatch.compile(&descriptor);

        tracing::info!(
            "compiled {} to {} ({} slots, {} methods)",
            root.name,
            descriptor.id,
            descriptor.size,
            table.len()
        );

        Ok(CompiledObject {
            label: root.name,
            descriptor,
            table,
            image,
        })
    }

    /// Compiles independent roots in parallel on the current rayon pool.
    /// Results come back in the order of `roots`.
    pub fn compile_all(&self, roots: &[Arc<ObjectLiteral>]) -> Vec<CompileResult<CompiledObject>> {
        roots.par_iter().map(|r| self.compile(r)).collect()
    }

    /// Structural satisfaction of `iface` by the resolved member set of `obj`.
    pub fn check(&self, obj: &CompiledObject, iface: &InterfaceConstraint) -> CompileResult<()> {
        self.check_layout(&obj.descriptor, obj.label, iface)
    }

    /// Memoised per layout. Failures are recomputed rather than stored so the
    /// diagnostic carries the names asked about this time.
    fn check_layout(
        &self,
        layout: &LayoutDescriptor,
        label: IStr,
        iface: &InterfaceConstraint,
    ) -> CompileResult<()> {
        let key = (layout.id, iface.fingerprint());
        if self.satisfied.get(&key).map(|r| *r.value()) == Some(true) {
            return Ok(());
        }

        let result = satisfies(&Named { label, inner: layout }, iface);
        self.satisfied.insert(key, result.is_ok());
        result
    }

    /// Checks that `arg` may be passed where `param` is declared.
    pub fn check_argument(&self, param: &ParamType, arg: &CompiledObject) -> CompileResult<()> {
        match param {
            ParamType::Concrete(id) if *id == arg.id() => Ok(()),
            ParamType::Concrete(id) => Err(CompilationError::ConcreteMismatch {
                site: NodeInfo::of(arg.label),
                expected: self
                    .dispatch
                    .table(*id)
                    .map(|t| t.layout.label)
                    .unwrap_or_else(|| id.to_string().intern()),
                found: arg.label,
            }),
            ParamType::Constrained(iface) => self.check(arg, iface),
            ParamType::Dynamic => Ok(()),
        }
    }

    pub fn plan(&self, site: &CallSite) -> CompileResult<DispatchPlan> {
        self.dispatch.plan(site)
    }

    /// Plans `site` and runs it on `receiver`. A constrained site first checks
    /// that the receiver's type satisfies its interface.
    pub fn invoke(
        &self,
        site: &CallSite,
        receiver: &mut Instance,
        args: &[Value],
    ) -> CompileResult<Value> {
        let plan = self.plan(site)?;

        if let Receiver::Constrained(iface) = &site.receiver {
            let table = receiver
                .table()
                .cloned()
                .or_else(|| self.dispatch.table(receiver.layout()))
                .ok_or_else(|| {
                    CompilationError::runtime(format!(
                        "no table was built for {}",
                        receiver.layout()
                    ))
                })?;
            self.check_layout(&table.layout, table.layout.label, iface)?;
        }

        self.machine.invoke(&plan, receiver, site.method, args)
    }

    pub fn read_field(
        &self,
        obj: &CompiledObject,
        instance: &Instance,
        name: IStr,
    ) -> CompileResult<Value> {
        self.machine.read_field(instance, &obj.descriptor, name)
    }

    pub fn flattener(&self) -> &Flattener {
        &self.flattener
    }

    pub fn graph(&self) -> &GraphBuilder {
        &self.graph
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Expr, FieldInit},
        dispatch::Receiver,
        errors::ErrorKind,
        types::{FieldType, Qualifier},
    };

    fn quacker(name: &str, sound: &str) -> Arc<ObjectLiteral> {
        ObjectLiteral::new(name)
            .method("quack", vec![], FieldType::Str, Expr::text(sound))
            .finish()
    }

    #[test]
    fn constrained_parameters_accept_any_matching_shape() {
        let s = Session::new();
        let iface =
            Arc::new(InterfaceConstraint::new("Quacks").method("quack", [], FieldType::Str));

        let a = s.compile(&quacker("Duck", "quack")).unwrap();
        let b = s.compile(&quacker("Robot", "beep")).unwrap();

        let param = ParamType::Constrained(iface);
        assert!(s.check_argument(&param, &a).is_ok());
        assert!(s.check_argument(&param, &b).is_ok());
        assert!(s.check_argument(&ParamType::Dynamic, &b).is_ok());
    }

    #[test]
    fn concrete_parameters_want_the_same_layout() {
        let s = Session::new();
        let duck = s.compile(&quacker("Duck", "quack")).unwrap();
        let counter = s
            .compile(
                &ObjectLiteral::new("Counter")
                    .field("n", FieldType::Int, Qualifier::Mut, FieldInit::Deferred)
                    .finish(),
            )
            .unwrap();

        let err = s.check_argument(&ParamType::Concrete(duck.id()), &counter).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcreteMismatchError);
        assert!(err.to_string().contains("Duck"));
    }

    #[test]
    fn failed_checks_name_the_interface_asked_about() {
        let s = Session::new();
        let rock = s.compile(&ObjectLiteral::new("Rock").finish()).unwrap();

        let a = InterfaceConstraint::new("Quacks").method("quack", [], FieldType::Str);
        let b = InterfaceConstraint::new("Noisy").method("quack", [], FieldType::Str);

        assert!(s.check(&rock, &a).unwrap_err().to_string().contains("Quacks"));
        assert!(s.check(&rock, &b).unwrap_err().to_string().contains("Noisy"));
    }

    #[test]
    fn invoke_plans_then_runs() {
        let s = Session::new();
        let duck = s.compile(&quacker("Duck", "quack")).unwrap();
        let site = CallSite {
            receiver: Receiver::Monomorphized(duck.id()),
            method: "quack".intern(),
        };

        let mut i = duck.instantiate(&s.plan(&site).unwrap()).unwrap();
        assert!(i.is_boxed());
        assert_eq!(s.invoke(&site, &mut i, &[]).unwrap(), Value::str("quack"));
    }

    #[test]
    fn constrained_sites_check_the_receiver() {
        let s = Session::new();
        let rock = s
            .compile(
                &ObjectLiteral::new("Rock")
                    .method("quack", vec![], FieldType::Int, Expr::lit(Value::Int(7)))
                    .finish(),
            )
            .unwrap();
        let quacks =
            Arc::new(InterfaceConstraint::new("Quacks").method("quack", [], FieldType::Str));

        let site = CallSite {
            receiver: Receiver::Constrained(quacks),
            method: "quack".intern(),
        };
        let mut i = rock.boxed();
        let err = s.invoke(&site, &mut i, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCaseError);

        let duck = s.compile(&quacker("Duck", "quack")).unwrap();
        let mut d = duck.boxed();
        assert_eq!(s.invoke(&site, &mut d, &[]).unwrap(), Value::str("quack"));
    }

    #[test]
    fn diagnostics_name_the_checked_object_not_the_cached_one() {
        let s = Session::new();
        let swims = InterfaceConstraint::new("Swims").method("swim", [], FieldType::Str);

        let mallard = s.compile(&quacker("Mallard", "quack")).unwrap();
        let teal = s.compile(&quacker("Teal", "quack")).unwrap();
        assert!(Arc::ptr_eq(&mallard.descriptor, &teal.descriptor));

        let err = s.check(&teal, &swims).unwrap_err().to_string();
        assert!(err.contains("Teal"));
        assert!(!err.contains("Mallard"));
    }

    #[test]
    fn only_eligible_types_drop_their_table() {
        let s = Session::new();
        let pair = s
            .compile(
                &ObjectLiteral::new("Pair")
                    .field("a", FieldType::Int, Qualifier::Let, FieldInit::Deferred)
                    .field("b", FieldType::Int, Qualifier::Let, FieldInit::Deferred)
                    .finish(),
            )
            .unwrap();
        let cell = s
            .compile(
                &ObjectLiteral::new("Cell")
                    .field("a", FieldType::Int, Qualifier::Let, FieldInit::Deferred)
                    .finish(),
            )
            .unwrap();

        assert!(pair.elided().is_err());
        assert!(!cell.elided().unwrap().is_boxed());

        let foreign = DispatchPlan::Elided {
            table: cell.table.clone(),
        };
        assert!(pair.instantiate(&foreign).is_err());
    }
}
