//! Turns an expanded object literal into its composition tree.
//!
//! Every `@Extend`/`@Mixin` target must be an object that was constructed at
//! compile time, and each such object may be consumed by exactly one child.
//! That single-ownership rule is what keeps every graph a tree: there is no
//! way to reach the same parent instance along two paths, so diamonds, and
//! with them any need for a linearization order, cannot occur.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use itertools::Itertools;
use smallvec::SmallVec;

use crate::{
    ast::{EdgeKind, InstanceID, NodeInfo, ObjectLiteral, TargetExpr},
    errors::{CompilationError, CompileResult},
    helper::interner::IStr,
};

/// One `@Extend` or `@Mixin` relation, owned by the child.
#[derive(Debug)]
pub struct CompositionEdge {
    pub kind: EdgeKind,
    pub parent: CompositionTree,

    /// Members the child declares directly that the parent already resolves
    pub overrides: SmallVec<[IStr; 4]>,

    pub site: NodeInfo,
}

/// The composition tree rooted at one object literal.
///
/// Edges are kept in layout order: the extend target first, then mixins in
/// declaration order.
#[derive(Debug)]
pub struct CompositionTree {
    pub literal: Arc<ObjectLiteral>,
    pub edges: Vec<CompositionEdge>,

    /// Every member name reachable from this node, own names first
    pub resolved_members: Vec<IStr>,
}

impl CompositionTree {
    pub fn name(&self) -> IStr {
        self.literal.name
    }

    pub fn extend_edge(&self) -> Option<&CompositionEdge> {
        self.edges.iter().find(|e| e.kind == EdgeKind::Extend)
    }

    pub fn depth(&self) -> usize {
        1 + self.edges.iter().map(|e| e.parent.depth()).max().unwrap_or(0)
    }
}

/// Builds composition trees and keeps the ledger of which child consumed
/// which parent instance. One builder is shared by everything compiled in a
/// session, so the ledger spans all roots, including ones built in parallel.
pub struct GraphBuilder {
    claims: DashMap<InstanceID, (InstanceID, NodeInfo)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self { claims: DashMap::new() }
    }

    #[tracing::instrument(skip(self, root), fields(object = %root.name))]
    pub fn build(&self, root: &Arc<ObjectLiteral>) -> CompileResult<CompositionTree> {
        self.build_node(root)
    }

    fn build_node(&self, literal: &Arc<ObjectLiteral>) -> CompileResult<CompositionTree> {
        let site = NodeInfo::of(literal.name);

        if literal.compositions().filter(|c| c.kind == EdgeKind::Extend).count() > 1 {
            return Err(CompilationError::MultipleExtend { site });
        }

        // validation runs in declaration order so a duplicate is reported at the
        // textually second use; placement then puts the extend target first
        let mut parents: Vec<(EdgeKind, &Arc<ObjectLiteral>, NodeInfo)> = Vec::new();
        for comp in literal.compositions() {
            let target = match &comp.target {
                TargetExpr::Object(o) => o,
                TargetExpr::Runtime(expression) => {
                    return Err(CompilationError::NonConstantCompositionTarget {
                        site,
                        kind: comp.kind,
                        expression: *expression,
                    })
                }
            };

            let edge_site = NodeInfo::member(literal.name, target.name);
            let earlier = parents.iter().find(|(_, p, _)| p.id() == target.id());
            if let Some((_, _, first_use)) = earlier {
                return Err(CompilationError::DuplicateComposition {
                    target: target.name,
                    first_use: *first_use,
                    second_use: edge_site,
                });
            }
            self.claim(literal, target, edge_site)?;
            parents.push((comp.kind, target, edge_site));
        }

        let own: Vec<IStr> = literal.direct_members().map(|m| m.name()).unique().collect();

        let mut edges = Vec::with_capacity(parents.len());
        for (kind, target, edge_site) in parents
            .into_iter()
            .sorted_by_key(|(kind, _, _)| *kind != EdgeKind::Extend)
        {
            let parent = self.build_node(target)?;

            let overrides: SmallVec<[IStr; 4]> = own
                .iter()
                .copied()
                .filter(|n| parent.resolved_members.contains(n))
                .collect();

            tracing::debug!(
                "{} {kind} {} overrides {:?}",
                literal.name,
                target.name,
                overrides
            );

            edges.push(CompositionEdge {
                kind,
                parent,
                overrides,
                site: edge_site,
            });
        }

        let resolved_members = own
            .iter()
            .copied()
            .chain(edges.iter().flat_map(|e| e.parent.resolved_members.iter().copied()))
            .unique()
            .collect();

        Ok(CompositionTree {
            literal: literal.clone(),
            edges,
            resolved_members,
        })
    }

    /// Records that `child` consumes `target`. The same child claiming the same
    /// target again is the same edge being rebuilt and is accepted.
    fn claim(
        &self,
        child: &ObjectLiteral,
        target: &ObjectLiteral,
        site: NodeInfo,
    ) -> CompileResult<()> {
        match self.claims.entry(target.id()) {
            Entry::Occupied(prior) => {
                let (owner, first_use) = *prior.get();
                if owner == child.id() {
                    Ok(())
                } else {
                    Err(CompilationError::DuplicateComposition {
                        target: target.name,
                        first_use,
                        second_use: site,
                    })
                }
            }
            Entry::Vacant(v) => {
                v.insert((child.id(), site));
                Ok(())
            }
        }
    }

    pub fn owner_of(&self, target: InstanceID) -> Option<InstanceID> {
        self.claims.get(&target).map(|c| c.value().0)
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}
