//! A small interpreter over compiled layouts, so that what the compiler
//! decided about offsets and dispatch can actually be observed.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    ast::{Intrinsic, NodeInfo},
    dispatch::{DispatchPlan, DispatchTable},
    errors::{CompilationError, CompileResult},
    helper::interner::IStr,
    layout::{LayoutDescriptor, LayoutID},
    lir::{MethodEntry, Op},
    types::Value,
};

/// One live object: a single contiguous storage buffer, plus a table
/// pointer when the instance is boxed.
#[derive(Clone, Debug)]
pub enum Instance {
    Boxed {
        table: Arc<DispatchTable>,
        storage: Box<[Value]>,
    },

    /// No table on the instance; whoever calls a method on it supplies one
    Elided {
        layout: LayoutID,
        storage: SmallVec<[Value; 2]>,
    },
}

impl Instance {
    pub fn boxed(table: Arc<DispatchTable>, image: Vec<Value>) -> Instance {
        Instance::Boxed {
            table,
            storage: image.into_boxed_slice(),
        }
    }

    pub fn elided(layout: LayoutID, image: Vec<Value>) -> Instance {
        Instance::Elided {
            layout,
            storage: SmallVec::from_vec(image),
        }
    }

    pub fn layout(&self) -> LayoutID {
        match self {
            Instance::Boxed { table, .. } => table.id(),
            Instance::Elided { layout, .. } => *layout,
        }
    }

    pub fn storage(&self) -> &[Value] {
        match self {
            Instance::Boxed { storage, .. } => storage,
            Instance::Elided { storage, .. } => storage.as_slice(),
        }
    }

    fn storage_mut(&mut self) -> &mut [Value] {
        match self {
            Instance::Boxed { storage, .. } => storage,
            Instance::Elided { storage, .. } => storage.as_mut_slice(),
        }
    }

    pub fn table(&self) -> Option<&Arc<DispatchTable>> {
        match self {
            Instance::Boxed { table, .. } => Some(table),
            Instance::Elided { .. } => None,
        }
    }

    pub fn is_boxed(&self) -> bool {
        matches!(self, Instance::Boxed { .. })
    }

    /// Attaches `table` to an elided instance. Boxed instances are returned
    /// as they are.
    pub fn into_boxed(self, table: Arc<DispatchTable>) -> CompileResult<Instance> {
        match self {
            Instance::Elided { layout, storage } => {
                if layout != table.id() {
                    return Err(CompilationError::runtime(format!(
                        "table {} does not belong to layout {layout}",
                        table.id()
                    )));
                }
                Ok(Instance::boxed(table, storage.into_vec()))
            }
            boxed => Ok(boxed),
        }
    }
}

/// Equality is by value: the same concrete type with equal storage, however
/// each side happens to be dispatched.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.layout() == other.layout() && self.storage() == other.storage()
    }
}

impl Eq for Instance {}

pub struct Machine {
    depth_limit: usize,
}

impl Machine {
    pub fn new() -> Self {
        Self { depth_limit: 256 }
    }

    pub fn with_depth_limit(depth_limit: usize) -> Self {
        Self { depth_limit }
    }

    /// Runs `method` on `receiver` under `plan`. An elided plan supplies the
    /// table; a boxed plan takes it from the instance.
    pub fn invoke(
        &self,
        plan: &DispatchPlan,
        receiver: &mut Instance,
        method: IStr,
        args: &[Value],
    ) -> CompileResult<Value> {
        let table = match (plan, &*receiver) {
            (DispatchPlan::Elided { table }, r) => {
                if table.id() != r.layout() {
                    return Err(CompilationError::runtime(format!(
                        "table {} was passed for an instance of {}",
                        table.id(),
                        r.layout()
                    )));
                }
                table.clone()
            }
            (DispatchPlan::Boxed, Instance::Boxed { table, .. }) => table.clone(),
            (DispatchPlan::Boxed, Instance::Elided { layout, .. }) => {
                return Err(CompilationError::runtime(format!(
                    "instance of {layout} carries no table, one has to be passed at the call"
                )))
            }
        };

        let entry = table.lookup(method).cloned().ok_or_else(|| {
            CompilationError::runtime(format!("`{}` has no method `{method}`", table.layout.label))
        })?;

        tracing::trace!(
            "invoke {}.{} via {}",
            table.layout.label,
            method,
            if plan.is_elided() { "hidden parameter" } else { "instance table" }
        );

        self.call(&table, &entry, receiver.storage_mut(), args, 0)
    }

    pub fn read_field(
        &self,
        instance: &Instance,
        layout: &LayoutDescriptor,
        name: IStr,
    ) -> CompileResult<Value> {
        if instance.layout() != layout.id {
            return Err(CompilationError::runtime(format!(
                "instance of {} read through layout {}",
                instance.layout(),
                layout.id
            )));
        }

        let entry = layout.entry(name).ok_or_else(|| {
            CompilationError::runtime(format!("`{}` has no field `{name}`", layout.label))
        })?;
        let slots = instance
            .storage()
            .get(entry.offset as usize..(entry.offset + entry.size) as usize)
            .ok_or_else(|| {
                CompilationError::runtime(format!(
                    "field `{name}` lies past the end of its instance"
                ))
            })?;

        Ok(entry.ty.gather(slots))
    }

    fn call(
        &self,
        table: &DispatchTable,
        entry: &MethodEntry,
        storage: &mut [Value],
        args: &[Value],
        depth: usize,
    ) -> CompileResult<Value> {
        if depth >= self.depth_limit {
            return Err(CompilationError::runtime(format!(
                "call depth exceeded {} in `{}`",
                self.depth_limit, entry.name
            )));
        }

        if args.len() != entry.arity() {
            return Err(CompilationError::runtime(format!(
                "`{}` takes {} arguments, got {}",
                entry.name,
                entry.arity(),
                args.len()
            )));
        }

        for (v, ty) in args.iter().zip(entry.signature.params.iter()) {
            if !v.type_of().is_assignable_to(ty) {
                return Err(CompilationError::runtime(format!(
                    "`{}` expects {ty}, got {}",
                    entry.name,
                    v.type_of()
                )));
            }
        }

        let site = NodeInfo::member(table.layout.label, entry.name);
        let result = self.eval(&entry.body, table, storage, args, depth, site)?;

        // bodies the lowering could only type as `Any` are held to their
        // declared result here
        let found = result.type_of();
        if !found.is_assignable_to(&entry.signature.returns) {
            return Err(CompilationError::TypeMismatch {
                site,
                expected: entry.signature.returns.clone(),
                found,
            });
        }

        Ok(result)
    }

    fn eval(
        &self,
        op: &Op,
        table: &DispatchTable,
        storage: &mut [Value],
        args: &[Value],
        depth: usize,
        site: NodeInfo,
    ) -> CompileResult<Value> {
        let out_of_range =
            |slot: u32| CompilationError::runtime(format!("slot {slot} is outside the instance"));

        Ok(match op {
            Op::Const(v) => v.clone(),
            Op::Param(i) => args
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| CompilationError::runtime(format!("no parameter {i}")))?,
            Op::Load { slot, ty } => {
                let end = (slot + ty.size_in_slots()) as usize;
                let slots = storage.get(*slot as usize..end).ok_or_else(|| out_of_range(*slot))?;
                ty.gather(slots)
            }
            Op::Store { slot, ty, value } => {
                let value = self.eval(value, table, storage, args, depth, site)?;
                let found = value.type_of();
                if !found.is_assignable_to(ty) {
                    return Err(CompilationError::TypeMismatch {
                        site,
                        expected: ty.clone(),
                        found,
                    });
                }
                let mut scattered = Vec::with_capacity(ty.size_in_slots() as usize);
                ty.scatter(&value, &mut scattered);

                let end = *slot as usize + scattered.len();
                if scattered.len() != ty.size_in_slots() as usize || end > storage.len() {
                    return Err(out_of_range(*slot));
                }
                storage[*slot as usize..end].clone_from_slice(&scattered);
                Value::Unit
            }
            Op::CallSelf { method, args: actuals } => {
                let argv = self.eval_all(actuals, table, storage, args, depth, site)?;
                let entry = table
                    .lookup(*method)
                    .cloned()
                    .ok_or_else(|| CompilationError::runtime(format!("no method `{method}`")))?;
                self.call(table, &entry, storage, &argv, depth + 1)?
            }
            Op::CallBase { target, args: actuals } => {
                let argv = self.eval_all(actuals, table, storage, args, depth, site)?;
                self.call(table, target, storage, &argv, depth + 1)?
            }
            Op::Intrinsic(which, actuals) => {
                let argv = self.eval_all(actuals, table, storage, args, depth, site)?;
                apply(*which, argv)?
            }
            Op::Project(of, index) => match self.eval(of, table, storage, args, depth, site)? {
                Value::Tuple(mut vals) if (*index as usize) < vals.len() => {
                    vals.swap_remove(*index as usize)
                }
                other => {
                    return Err(CompilationError::runtime(format!(
                        "cannot take .{index} of {other}"
                    )));
                }
            },
            Op::If(c, t, e) => match self.eval(c, table, storage, args, depth, site)? {
                Value::Bool(true) => self.eval(t, table, storage, args, depth, site)?,
                Value::Bool(false) => self.eval(e, table, storage, args, depth, site)?,
                other => {
                    return Err(CompilationError::runtime(format!(
                        "condition evaluated to {other}"
                    )));
                }
            },
            Op::Seq(ops) => {
                let mut last = Value::Unit;
                for o in ops {
                    last = self.eval(o, table, storage, args, depth, site)?;
                }
                last
            }
        })
    }

    fn eval_all(
        &self,
        ops: &[Op],
        table: &DispatchTable,
        storage: &mut [Value],
        args: &[Value],
        depth: usize,
        site: NodeInfo,
    ) -> CompileResult<SmallVec<[Value; 4]>> {
        let mut out = SmallVec::with_capacity(ops.len());
        for o in ops {
            out.push(self.eval(o, table, storage, args, depth, site)?);
        }
        Ok(out)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(which: Intrinsic, args: SmallVec<[Value; 4]>) -> CompileResult<Value> {
    let bad = |args: &[Value]| {
        CompilationError::runtime(format!(
            "bad operands for {which}: {}",
            args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
        ))
    };

    let ints = |args: &[Value]| -> CompileResult<SmallVec<[i64; 4]>> {
        args.iter()
            .map(|a| match a {
                Value::Int(i) => Ok(*i),
                _ => Err(bad(args)),
            })
            .collect()
    };

    Ok(match which {
        // integer arithmetic wraps
        Intrinsic::Add => {
            Value::Int(ints(args.as_slice())?.iter().fold(0i64, |acc, i| acc.wrapping_add(*i)))
        }
        Intrinsic::Mul => {
            Value::Int(ints(args.as_slice())?.iter().fold(1i64, |acc, i| acc.wrapping_mul(*i)))
        }
        Intrinsic::Sub => match ints(args.as_slice())?.as_slice() {
            [a, b] => Value::Int(a.wrapping_sub(*b)),
            _ => return Err(bad(args.as_slice())),
        },
        Intrinsic::Concat => {
            let mut s = String::new();
            for a in args.iter() {
                match a {
                    Value::Str(part) => s.push_str(part),
                    _ => return Err(bad(args.as_slice())),
                }
            }
            Value::str(&s)
        }
        Intrinsic::Upper => match args.as_slice() {
            [Value::Str(s)] => Value::str(&s.to_uppercase()),
            _ => return Err(bad(args.as_slice())),
        },
        Intrinsic::Eq => match args.as_slice() {
            [a, b] => Value::Bool(a == b),
            _ => return Err(bad(args.as_slice())),
        },
        Intrinsic::Not => match args.as_slice() {
            [Value::Bool(b)] => Value::Bool(!b),
            _ => return Err(bad(args.as_slice())),
        },
        Intrinsic::Tuple => Value::Tuple(args.into_vec()),
    })
}
