pub mod flatten;
pub mod shape;

pub use flatten::Flattener;
pub use shape::ShapeKey;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use static_assertions::assert_impl_all;

use crate::{
    ast::EdgeKind,
    helper::{indent, interner::IStr},
    lir::MethodEntry,
    types::{FieldType, FieldView, MethodSignature, Qualifier, Shaped, Value},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display(fmt = "L{}", _0)]
pub struct LayoutID(u64);

impl LayoutID {
    #[cfg(test)]
    pub(crate) fn test(raw: u64) -> Self {
        Self(raw)
    }
}

pub fn generate_layout_id() -> LayoutID {
    static GENERATOR: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
    LayoutID(GENERATOR.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
}

/// One stored field of a flattened layout.
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutEntry {
    pub name: IStr,
    pub ty: FieldType,

    /// Absolute slot within the root buffer
    pub offset: u32,
    pub size: u32,

    pub qualifier: Qualifier,

    /// Only set for `const` fields, whose value is part of the type
    pub constant: Option<Value>,

    /// Index into `LayoutDescriptor::regions`
    pub region: usize,
}

impl LayoutEntry {
    pub fn new<N: Into<IStr>>(
        name: N,
        ty: FieldType,
        offset: u32,
        qualifier: Qualifier,
        constant: Option<Value>,
        region: usize,
    ) -> Self {
        Self {
            name: name.into(),
            size: ty.size_in_slots(),
            ty,
            offset,
            qualifier,
            constant,
            region,
        }
    }

    pub fn slots(&self) -> std::ops::Range<u32> {
        self.offset..self.offset + self.size
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum RegionKind {
    Extend,
    Mixin,
    Own,
}

impl From<EdgeKind> for RegionKind {
    fn from(k: EdgeKind) -> Self {
        match k {
            EdgeKind::Extend => RegionKind::Extend,
            EdgeKind::Mixin => RegionKind::Mixin,
        }
    }
}

/// A contiguous sub-range of the root buffer. Regions never overlap and,
/// in order, cover the whole buffer.
#[derive(Clone, Debug)]
pub struct Region {
    pub label: IStr,
    pub kind: RegionKind,
    pub offset: u32,
    pub size: u32,

    /// The flattened parent this region was copied from, absent for `Own`
    pub parent: Option<Arc<LayoutDescriptor>>,
}

impl Region {
    pub fn slots(&self) -> std::ops::Range<u32> {
        self.offset..self.offset + self.size
    }
}

/// The flattened shape of one concrete composed type.
///
/// Immutable once published, and shared by every instance of the type.
#[derive(Debug)]
pub struct LayoutDescriptor {
    pub id: LayoutID,

    /// Name of the first literal this shape was compiled from
    pub label: IStr,

    pub entries: Vec<LayoutEntry>,
    pub regions: Vec<Region>,

    /// The resolved method set: inherited entries in region order with
    /// overrides replacing them in place, then methods new to this type
    pub methods: Vec<Arc<MethodEntry>>,

    pub size: u32,
    pub shape: Arc<ShapeKey>,

    by_name: OnceCell<FxHashMap<IStr, usize>>,
}

assert_impl_all!(LayoutDescriptor: Send, Sync);

impl LayoutDescriptor {
    pub(crate) fn new(
        id: LayoutID,
        label: IStr,
        entries: Vec<LayoutEntry>,
        regions: Vec<Region>,
        methods: Vec<Arc<MethodEntry>>,
        shape: Arc<ShapeKey>,
    ) -> Self {
        let size = regions.iter().map(|r| r.size).sum();
        Self {
            id,
            label,
            entries,
            regions,
            methods,
            size,
            shape,
            by_name: OnceCell::new(),
        }
    }

    pub fn entry(&self, name: IStr) -> Option<&LayoutEntry> {
        let index = self
            .by_name
            .get_or_init(|| self.entries.iter().enumerate().map(|(i, e)| (e.name, i)).collect());
        index.get(&name).map(|i| &self.entries[*i])
    }

    pub fn method(&self, name: IStr) -> Option<&Arc<MethodEntry>> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Exactly one stored field, which makes the type a candidate for
    /// passing its table alongside instead of inside the value.
    pub fn is_primitive_like(&self) -> bool {
        self.entries.len() == 1
    }

    pub fn region_of(&self, entry: &LayoutEntry) -> &Region {
        &self.regions[entry.region]
    }
}

impl Shaped for LayoutDescriptor {
    fn label(&self) -> IStr {
        self.label
    }

    fn field_view(&self, name: IStr) -> Option<FieldView<'_>> {
        self.entry(name).map(|e| FieldView {
            ty: &e.ty,
            qualifier: e.qualifier,
            constant: e.constant.as_ref(),
        })
    }

    fn method_signature(&self, name: IStr) -> Option<MethodSignature> {
        self.method(name).map(|m| m.signature.clone())
    }
}

impl std::fmt::Display for LayoutDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "layout {} ({}), {} slots", self.label, self.id, self.size)?;
        for (ri, r) in self.regions.iter().enumerate() {
            writeln!(
                f,
                "{}region {} {} [{}..{})",
                indent(1),
                r.kind,
                r.label,
                r.offset,
                r.offset + r.size
            )?;
            for e in self.entries.iter().filter(|e| e.region == ri) {
                write!(f, "{}{:>3} {} {}: {}", indent(2), e.offset, e.qualifier, e.name, e.ty)?;
                if let Some(c) = &e.constant {
                    write!(f, " = {c}")?;
                }
                writeln!(f)?;
            }
        }
        for m in self.methods.iter() {
            writeln!(
                f,
                "{}fn {}{} this+{} (from {})",
                indent(1),
                m.name,
                m.signature,
                m.this_offset,
                m.declared_in
            )?;
        }
        Ok(())
    }
}
