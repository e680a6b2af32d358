use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{generate_layout_id, LayoutDescriptor, LayoutEntry, Region, RegionKind, ShapeKey};
use crate::{
    ast::{EdgeKind, FieldInit, NodeInfo},
    compose::CompositionTree,
    errors::{CompilationError, CompileResult, MemberKind},
    helper::interner::IStr,
    lir::{lower, rewrite, MethodEntry},
    types::{MethodSignature, Qualifier, Value},
};

/// Flattens composition trees into layouts, bottom-up, caching by structure.
///
/// The cache is the only state shared between parallel compilations. A miss
/// computes its candidate without holding any shard lock and then publishes
/// it through `entry().or_insert()`, so when two threads race on the same
/// shape the first insert wins and the other adopts it.
pub struct Flattener {
    cache: DashMap<Arc<ShapeKey>, Arc<LayoutDescriptor>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Flattener {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    #[tracing::instrument(skip(self, tree), fields(object = %tree.name()))]
    pub fn flatten(&self, tree: &CompositionTree) -> CompileResult<Arc<LayoutDescriptor>> {
        let parents = tree
            .edges
            .iter()
            .map(|e| self.flatten(&e.parent))
            .collect::<CompileResult<Vec<_>>>()?;

        let shape = Arc::new(ShapeKey::of(
            &tree.literal,
            tree.edges
                .iter()
                .zip(parents.iter())
                .map(|(e, p)| (e.kind, p.shape.clone())),
        ));

        if let Some(hit) = self.cache.get(&shape) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("{} reuses {}", tree.name(), hit.value().id);
            return Ok(hit.value().clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let candidate = Arc::new(self.assemble(tree, &parents, shape.clone())?);
        let published = self.cache.entry(shape).or_insert(candidate.clone()).value().clone();

        if Arc::ptr_eq(&published, &candidate) {
            tracing::debug!(
                "flattened {} as {} ({} slots)",
                tree.name(),
                published.id,
                published.size
            );
        } else {
            tracing::debug!(
                "{} lost the race for its shape, adopting {}",
                tree.name(),
                published.id
            );
        }

        Ok(published)
    }

    fn assemble(
        &self,
        tree: &CompositionTree,
        parents: &[Arc<LayoutDescriptor>],
        shape: Arc<ShapeKey>,
    ) -> CompileResult<LayoutDescriptor> {
        let literal = &tree.literal;
        let id = generate_layout_id();

        let mut entries: Vec<LayoutEntry> = Vec::new();
        let mut regions: Vec<Region> = Vec::new();
        let mut methods: Vec<Arc<MethodEntry>> = Vec::new();
        let mut base: Option<Vec<Arc<MethodEntry>>> = None;

        // region that first brought each inherited name
        let mut provided: FxHashMap<IStr, usize> = FxHashMap::default();
        let own_methods: FxHashSet<IStr> = literal.direct_methods().map(|m| m.name).collect();

        let mut offset = 0u32;

        for (edge, parent) in tree.edges.iter().zip(parents.iter()) {
            let ri = regions.len();
            let ambiguous = |member: IStr, first: usize| CompilationError::AmbiguousOverride {
                site: NodeInfo::member(literal.name, member),
                member,
                first_region: regions[first].label,
                second_region: parent.label,
            };

            for e in parent.entries.iter() {
                if let Some(&first) = provided.get(&e.name) {
                    return Err(ambiguous(e.name, first));
                }
                provided.insert(e.name, ri);
                entries.push(LayoutEntry {
                    offset: e.offset + offset,
                    region: ri,
                    ..e.clone()
                });
            }

            let placed: Vec<Arc<MethodEntry>> =
                parent.methods.iter().map(|m| rewrite::promote(m, offset)).collect();

            for m in placed.iter() {
                match provided.get(&m.name) {
                    Some(&first) => {
                        let settled_by_child = own_methods.contains(&m.name)
                            && !entries.iter().any(|e| e.name == m.name);
                        if !settled_by_child {
                            return Err(ambiguous(m.name, first));
                        }
                    }
                    None => {
                        provided.insert(m.name, ri);
                        methods.push(m.clone());
                    }
                }
            }

            if edge.kind == EdgeKind::Extend {
                base = Some(placed);
            }

            regions.push(Region {
                label: parent.label,
                kind: edge.kind.into(),
                offset,
                size: parent.size,
                parent: Some(parent.clone()),
            });
            offset += parent.size;
        }

        let own_region = regions.len();
        let own_start = offset;
        let mut declared: FxHashSet<IStr> = FxHashSet::default();

        for f in literal.direct_fields() {
            let site = NodeInfo::member(literal.name, f.name);

            if !declared.insert(f.name) {
                return Err(CompilationError::AmbiguousOverride {
                    site,
                    member: f.name,
                    first_region: literal.name,
                    second_region: literal.name,
                });
            }

            let constant = match (&f.init, f.qualifier) {
                (FieldInit::Constant(v), Qualifier::Const) => {
                    if !v.type_of().is_assignable_to(&f.ty) {
                        return Err(CompilationError::TypeMismatch {
                            site,
                            expected: f.ty.clone(),
                            found: v.type_of(),
                        });
                    }
                    Some(v.clone())
                }
                (FieldInit::Deferred, Qualifier::Const) => {
                    return Err(CompilationError::ConstWithoutValue { site })
                }
                _ => None,
            };

            if let Some(existing) = entries.iter_mut().find(|e| e.name == f.name) {
                // a redeclared field keeps its parent's slot, only its default changes
                if existing.ty != f.ty || existing.qualifier != f.qualifier {
                    return Err(CompilationError::OverrideMismatch {
                        site,
                        member: f.name,
                        inherited: format!("{} {}", existing.qualifier, existing.ty),
                        declared: format!("{} {}", f.qualifier, f.ty),
                    });
                }
                if constant.is_some() {
                    existing.constant = constant;
                }
                continue;
            }

            if let Some(m) = methods.iter().find(|m| m.name == f.name) {
                return Err(CompilationError::OverrideMismatch {
                    site,
                    member: f.name,
                    inherited: format!("fn {}", m.signature),
                    declared: format!("{} {}", f.qualifier, f.ty),
                });
            }

            let entry =
                LayoutEntry::new(f.name, f.ty.clone(), offset, f.qualifier, constant, own_region);
            offset += entry.size;
            entries.push(entry);
        }

        regions.push(Region {
            label: literal.name,
            kind: RegionKind::Own,
            offset: own_start,
            size: offset - own_start,
            parent: None,
        });
        let size = offset;

        let mut signatures: FxHashMap<IStr, MethodSignature> =
            methods.iter().map(|m| (m.name, m.signature.clone())).collect();

        for d in literal.direct_methods() {
            let site = NodeInfo::member(literal.name, d.name);

            if !declared.insert(d.name) {
                return Err(CompilationError::AmbiguousOverride {
                    site,
                    member: d.name,
                    first_region: literal.name,
                    second_region: literal.name,
                });
            }

            if let Some(e) = entries.iter().find(|e| e.name == d.name) {
                return Err(CompilationError::OverrideMismatch {
                    site,
                    member: d.name,
                    inherited: format!("{} {}", e.qualifier, e.ty),
                    declared: format!("fn {}", d.signature()),
                });
            }

            let sig = d.signature();
            if let Some(inherited) = signatures.get(&d.name) {
                if !sig.satisfies(inherited) {
                    return Err(CompilationError::OverrideMismatch {
                        site,
                        member: d.name,
                        inherited: format!("fn {inherited}"),
                        declared: format!("fn {sig}"),
                    });
                }
            }
            signatures.insert(d.name, sig);
        }

        let scope = lower::Scope {
            owner: literal.name,
            declared_in: id,
            this_offset: 0,
            frame_size: size,
            fields: &entries,
            signatures: &signatures,
            base: base.as_deref(),
        };

        let mut lowered = Vec::new();
        for d in literal.direct_methods() {
            lowered.push(Arc::new(lower::lower(d, &scope)?));
        }

        for entry in lowered {
            match methods.iter_mut().find(|m| m.name == entry.name) {
                Some(slot) => *slot = entry,
                None => methods.push(entry),
            }
        }

        for m in methods.iter() {
            rewrite::verify(m, size, NodeInfo::member(literal.name, m.name))?;
        }

        Ok(LayoutDescriptor::new(id, literal.name, entries, regions, methods, shape))
    }

    /// Builds the initial storage of one instance of `tree`, which must have
    /// been flattened to `desc`.
    ///
    /// Regions are filled in layout order. A child's constant default for an
    /// inherited field is written into the parent's slot; a deferred
    /// redeclaration keeps whatever the parent put there.
    pub fn image(
        &self,
        tree: &CompositionTree,
        desc: &LayoutDescriptor,
    ) -> CompileResult<Vec<Value>> {
        let mut slots = vec![Value::Unit; desc.size as usize];
        write_image(tree, desc, 0, &mut slots)?;
        Ok(slots)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl Default for Flattener {
    fn default() -> Self {
        Self::new()
    }
}

fn write_image(
    tree: &CompositionTree,
    desc: &LayoutDescriptor,
    base: u32,
    slots: &mut [Value],
) -> CompileResult<()> {
    let inherited = desc
        .regions
        .iter()
        .filter_map(|r| r.parent.as_ref().map(|p| (r.offset, p)));

    for (edge, (offset, parent)) in tree.edges.iter().zip(inherited) {
        write_image(&edge.parent, parent, base + offset, slots)?;
    }

    for f in tree.literal.direct_fields() {
        let site = NodeInfo::member(tree.name(), f.name);
        let entry = desc.entry(f.name).ok_or(CompilationError::UnresolvedMember {
            site,
            member: f.name,
            kind: MemberKind::Field,
        })?;

        let value = match &f.init {
            FieldInit::Constant(v) => v.clone(),
            FieldInit::Deferred if desc.region_of(entry).kind == RegionKind::Own => {
                Value::zero(&f.ty)
            }
            FieldInit::Deferred => continue,
        };

        let mut scattered = Vec::with_capacity(entry.size as usize);
        f.ty.scatter(&value, &mut scattered);

        if !value.type_of().is_assignable_to(&f.ty) || scattered.len() != entry.size as usize {
            return Err(CompilationError::TypeMismatch {
                site,
                expected: f.ty.clone(),
                found: value.type_of(),
            });
        }

        let start = (base + entry.offset) as usize;
        slots[start..start + scattered.len()].clone_from_slice(&scattered);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Expr, Member, ObjectLiteral},
        compose::GraphBuilder,
        errors::ErrorKind,
        helper::interner::Internable,
        types::FieldType,
    };

    fn filler(name: &str, n: usize) -> Arc<ObjectLiteral> {
        (0..n)
            .fold(ObjectLiteral::new(name), |o, i| {
                o.field(format!("{name}_{i}"), FieldType::Int, Qualifier::Let, FieldInit::Deferred)
            })
            .finish()
    }

    fn flat(lit: &Arc<ObjectLiteral>) -> CompileResult<(Arc<LayoutDescriptor>, Vec<Value>)> {
        let f = Flattener::new();
        let tree = GraphBuilder::new().build(lit)?;
        let desc = f.flatten(&tree)?;
        let image = f.image(&tree, &desc)?;
        Ok((desc, image))
    }

    #[test]
    fn regions_are_extend_mixins_own() {
        let lit = ObjectLiteral::new("Child")
            .field("own", FieldType::Str, Qualifier::Let, FieldInit::Constant(Value::str("me")))
            .mixin(&filler("M", 2), vec![])
            .extend(&filler("E", 3), vec![])
            .finish();

        let (desc, image) = flat(&lit).unwrap();

        let kinds: Vec<_> = desc.regions.iter().map(|r| (r.kind, r.offset, r.size)).collect();
        assert_eq!(
            kinds,
            vec![
                (RegionKind::Extend, 0, 3),
                (RegionKind::Mixin, 3, 2),
                (RegionKind::Own, 5, 1)
            ]
        );
        assert_eq!(desc.size, 6);
        assert_eq!(desc.entry("M_1".intern()).map(|e| e.offset), Some(4));
        assert_eq!(image[5], Value::str("me"));
    }

    #[test]
    fn overriding_a_field_reuses_the_parent_slot() {
        let parent = ObjectLiteral::new("P")
            .field("a", FieldType::Int, Qualifier::Let, FieldInit::Constant(Value::Int(1)))
            .field("b", FieldType::Int, Qualifier::Let, FieldInit::Constant(Value::Int(2)))
            .finish();
        let child = ObjectLiteral::new("C")
            .extend(
                &parent,
                vec![Member::field(
                    "b",
                    FieldType::Int,
                    Qualifier::Let,
                    FieldInit::Constant(Value::Int(20)),
                )],
            )
            .finish();

        let (desc, image) = flat(&child).unwrap();
        assert_eq!(desc.size, 2);
        assert_eq!(image, vec![Value::Int(1), Value::Int(20)]);
    }

    #[test]
    fn redeclaring_with_another_type_is_rejected() {
        let parent = filler("P", 1);
        let child = ObjectLiteral::new("C")
            .extend(
                &parent,
                vec![Member::field("P_0", FieldType::Str, Qualifier::Let, FieldInit::Deferred)],
            )
            .finish();

        assert_eq!(flat(&child).unwrap_err().kind(), ErrorKind::OverrideMismatchError);
    }

    #[test]
    fn sibling_collisions_need_an_override() {
        let a = || {
            ObjectLiteral::new("A")
                .method("hello", vec![], FieldType::Str, Expr::text("a"))
                .finish()
        };
        let b = || {
            ObjectLiteral::new("B")
                .method("hello", vec![], FieldType::Str, Expr::text("b"))
                .finish()
        };

        let unresolved = ObjectLiteral::new("AB").mixin(&a(), vec![]).mixin(&b(), vec![]).finish();
        assert_eq!(flat(&unresolved).unwrap_err().kind(), ErrorKind::AmbiguousOverrideError);

        let settled = ObjectLiteral::new("AB")
            .mixin(&a(), vec![])
            .mixin(&b(), vec![])
            .method("hello", vec![], FieldType::Str, Expr::text("ab"))
            .finish();
        let (desc, _) = flat(&settled).unwrap();
        assert_eq!(desc.methods.len(), 1);
        assert_eq!(desc.method("hello".intern()).map(|m| m.declared_in), Some(desc.id));
    }

    #[test]
    fn const_fields_need_values() {
        let lit = ObjectLiteral::new("K")
            .field("k", FieldType::Int, Qualifier::Const, FieldInit::Deferred)
            .finish();
        assert_eq!(flat(&lit).unwrap_err().kind(), ErrorKind::ConstWithoutValueError);
    }

    #[test]
    fn identical_shapes_hit_the_cache() {
        let f = Flattener::new();
        let gb = GraphBuilder::new();

        let one = gb.build(&filler("X", 2)).unwrap();
        let two = gb.build(&filler("X", 2)).unwrap();

        let a = f.flatten(&one).unwrap();
        let b = f.flatten(&two).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!((f.misses(), f.hits(), f.cached()), (1, 1, 1));
    }

    #[test]
    fn bad_default_types_fail_in_the_image() {
        let lit = ObjectLiteral::new("Bad")
            .field("n", FieldType::Int, Qualifier::Let, FieldInit::Constant(Value::str("one")))
            .finish();
        assert_eq!(flat(&lit).unwrap_err().kind(), ErrorKind::TypeMismatchError);
    }

    #[test]
    fn extend_and_mixin_may_not_share_a_field() {
        let e = ObjectLiteral::new("E")
            .field("tag", FieldType::Str, Qualifier::Let, FieldInit::Deferred)
            .finish();
        let m = ObjectLiteral::new("M")
            .field("tag", FieldType::Str, Qualifier::Let, FieldInit::Deferred)
            .field("href", FieldType::Str, Qualifier::Let, FieldInit::Deferred)
            .finish();
        let lit = ObjectLiteral::new("Child")
            .extend(
                &e,
                vec![Member::field("tag", FieldType::Str, Qualifier::Let, FieldInit::Deferred)],
            )
            .mixin(&m, vec![])
            .finish();

        match flat(&lit).unwrap_err() {
            CompilationError::AmbiguousOverride { first_region, second_region, .. } => {
                assert_eq!(first_region, "E".intern());
                assert_eq!(second_region, "M".intern());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn extend_and_mixin_methods_collide_unless_overridden() {
        let quacker = |name: &str, sound: &str| {
            ObjectLiteral::new(name)
                .method("quack", vec![], FieldType::Str, Expr::text(sound))
                .finish()
        };

        let open = ObjectLiteral::new("Open")
            .extend(&quacker("E", "quack"), vec![])
            .mixin(&quacker("M", "honk"), vec![])
            .finish();
        assert_eq!(flat(&open).unwrap_err().kind(), ErrorKind::AmbiguousOverrideError);

        let settled = ObjectLiteral::new("Settled")
            .extend(
                &quacker("E", "quack"),
                vec![Member::method("quack", vec![], FieldType::Str, Expr::base("quack", vec![]))],
            )
            .mixin(&quacker("M", "honk"), vec![])
            .finish();
        let (desc, _) = flat(&settled).unwrap();
        assert_eq!(desc.methods.len(), 1);
        assert_eq!(desc.method("quack".intern()).map(|m| m.declared_in), Some(desc.id));
    }
}
