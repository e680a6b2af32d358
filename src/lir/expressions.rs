use std::sync::Arc;

use crate::{
    ast::Intrinsic,
    helper::interner::IStr,
    layout::LayoutID,
    types::{FieldType, MethodSignature, Value},
};

/// A resolved method body. Field references are absolute slots within the
/// root storage buffer of whatever concrete type the owning entry is bound to.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    Const(Value),

    /// Positional parameter
    Param(u16),

    /// Read `ty.size_in_slots()` slots starting at `slot`
    Load { slot: u32, ty: FieldType },

    /// Write the value of `value` into the slots starting at `slot`
    Store { slot: u32, ty: FieldType, value: Box<Op> },

    /// Late bound call through the table of the receiver's concrete type
    CallSelf { method: IStr, args: Vec<Op> },

    /// `base.method(..)`, captured when the override was compiled.
    /// The target carries its own, independently computed this offset.
    CallBase { target: Arc<MethodEntry>, args: Vec<Op> },

    Intrinsic(Intrinsic, Vec<Op>),

    Project(Box<Op>, u32),

    If(Box<Op>, Box<Op>, Box<Op>),

    Seq(Vec<Op>),
}

/// A compiled method bound to a layout.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodEntry {
    pub name: IStr,
    pub signature: MethodSignature,
    pub body: Op,

    /// The layout that introduced (or overrode) this method
    pub declared_in: LayoutID,

    /// Where this method's frame begins within the root buffer. Zero for
    /// methods compiled against the root itself.
    pub this_offset: u32,

    /// Size of the frame the body was resolved against, which is the full
    /// size of `declared_in`
    pub frame_size: u32,
}

impl MethodEntry {
    pub fn frame(&self) -> std::ops::Range<u32> {
        self.this_offset..self.this_offset + self.frame_size
    }

    pub fn arity(&self) -> usize {
        self.signature.arity()
    }
}

impl Op {
    /// Calls `visit` on this op and every nested op, not descending into the
    /// bodies of captured base entries.
    pub fn walk<F: FnMut(&Op)>(&self, visit: &mut F) {
        visit(self);
        match self {
            Op::Const(_) | Op::Param(_) | Op::Load { .. } => (),
            Op::Store { value, .. } | Op::Project(value, _) => value.walk(visit),
            Op::CallSelf { args, .. }
            | Op::CallBase { args, .. }
            | Op::Intrinsic(_, args)
            | Op::Seq(args) => args.iter().for_each(|a| a.walk(visit)),
            Op::If(c, t, e) => {
                c.walk(visit);
                t.walk(visit);
                e.walk(visit);
            }
        }
    }
}
