use std::sync::Arc;

use super::{MethodEntry, Op};
use crate::{
    ast::NodeInfo,
    errors::{CompilationError, CompileResult},
};

/// Moves `entry` into a frame that begins `shift` slots further into the root
/// buffer.
///
/// Promotion is purely additive: promoting an already promoted entry shifts it
/// again from where it is, so composing a composed type only needs the size of
/// the new prefix. Base targets captured by the body travel with it.
pub fn promote(entry: &Arc<MethodEntry>, shift: u32) -> Arc<MethodEntry> {
    if shift == 0 {
        return entry.clone();
    }

    Arc::new(MethodEntry {
        name: entry.name,
        signature: entry.signature.clone(),
        body: shift_op(&entry.body, shift),
        declared_in: entry.declared_in,
        this_offset: entry.this_offset + shift,
        frame_size: entry.frame_size,
    })
}

fn shift_op(op: &Op, shift: u32) -> Op {
    let all = |args: &[Op]| args.iter().map(|a| shift_op(a, shift)).collect::<Vec<_>>();

    match op {
        Op::Const(v) => Op::Const(v.clone()),
        Op::Param(i) => Op::Param(*i),
        Op::Load { slot, ty } => Op::Load {
            slot: slot + shift,
            ty: ty.clone(),
        },
        Op::Store { slot, ty, value } => Op::Store {
            slot: slot + shift,
            ty: ty.clone(),
            value: Box::new(shift_op(value, shift)),
        },
        Op::CallSelf { method, args } => Op::CallSelf {
            method: *method,
            args: all(args),
        },
        Op::CallBase { target, args } => Op::CallBase {
            target: promote(target, shift),
            args: all(args),
        },
        Op::Intrinsic(which, args) => Op::Intrinsic(*which, all(args)),
        Op::Project(of, index) => Op::Project(Box::new(shift_op(of, shift)), *index),
        Op::If(c, t, e) => Op::If(
            Box::new(shift_op(c, shift)),
            Box::new(shift_op(t, shift)),
            Box::new(shift_op(e, shift)),
        ),
        Op::Seq(ops) => Op::Seq(all(ops)),
    }
}

/// Checks that every slot `entry` touches lies inside its own frame, and that
/// the frame itself lies inside a root of `root_size` slots. Captured base
/// targets are checked against their own frames.
pub fn verify(entry: &MethodEntry, root_size: u32, site: NodeInfo) -> CompileResult<()> {
    let frame = entry.frame();
    let violation = |slot: i64| CompilationError::LayoutViolation {
        site,
        slot,
        frame_start: entry.this_offset,
        frame_size: entry.frame_size,
    };

    if frame.end > root_size {
        return Err(violation(frame.end as i64 - 1));
    }

    let mut result = Ok(());
    entry.body.walk(&mut |op| {
        if result.is_err() {
            return;
        }
        match op {
            Op::Load { slot, ty } | Op::Store { slot, ty, .. } => {
                let end = *slot + ty.size_in_slots();
                if *slot < frame.start || end > frame.end {
                    result = Err(violation(*slot as i64));
                }
            }
            Op::CallBase { target, .. } => {
                if target.this_offset < frame.start || target.frame().end > frame.end {
                    result = Err(violation(target.this_offset as i64));
                } else {
                    result = verify(target, root_size, site);
                }
            }
            _ => (),
        }
    });

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::ErrorKind,
        helper::interner::Internable,
        layout::LayoutID,
        types::{FieldType, MethodSignature},
    };

    fn entry(body: Op, frame_size: u32) -> Arc<MethodEntry> {
        Arc::new(MethodEntry {
            name: "get".intern(),
            signature: MethodSignature::new([], FieldType::Int),
            body,
            declared_in: LayoutID::test(1),
            this_offset: 0,
            frame_size,
        })
    }

    fn loads(op: &Op) -> Vec<u32> {
        let mut v = Vec::new();
        op.walk(&mut |o| {
            if let Op::Load { slot, .. } = o {
                v.push(*slot)
            }
        });
        v
    }

    #[test]
    fn promotion_accumulates() {
        let base = entry(
            Op::Load {
                slot: 1,
                ty: FieldType::Int,
            },
            2,
        );

        let twice = promote(&promote(&base, 3), 4);
        let once = promote(&base, 7);

        assert_eq!(twice.this_offset, 7);
        assert_eq!(twice, once);
        assert_eq!(loads(&twice.body), vec![8]);
    }

    #[test]
    fn zero_shift_shares_the_entry() {
        let base = entry(Op::Const(crate::types::Value::Int(1)), 0);
        assert!(Arc::ptr_eq(&base, &promote(&base, 0)));
    }

    #[test]
    fn base_targets_move_with_the_override() {
        let parent = entry(
            Op::Load {
                slot: 0,
                ty: FieldType::Int,
            },
            1,
        );
        let child = entry(
            Op::CallBase {
                target: parent,
                args: vec![],
            },
            2,
        );

        let moved = promote(&child, 5);
        match &moved.body {
            Op::CallBase { target, .. } => {
                assert_eq!(target.this_offset, 5);
                assert_eq!(loads(&target.body), vec![5]);
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert!(verify(&moved, 7, NodeInfo::of("Child".intern())).is_ok());
    }

    #[test]
    fn out_of_frame_loads_are_violations() {
        let stray = entry(
            Op::Load {
                slot: 2,
                ty: FieldType::Int,
            },
            2,
        );

        let err = verify(&stray, 4, NodeInfo::of("Stray".intern())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutViolationError);
    }
}
