//! The already macro-expanded declaration form the composition compiler
//! consumes. By the time anything here exists, `@Extend`/`@Mixin` sugar has
//! been lowered into explicit `Composition` items and every `const`
//! expression has been folded into a literal `Value`.

pub mod expressions;
pub mod object;

pub use expressions::*;
pub use object::*;

use crate::helper::interner::IStr;

/// Where a diagnostic points: the object literal it was found in and,
/// where it matters, the member within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeInfo {
    pub within: IStr,
    pub member: Option<IStr>,
}

impl NodeInfo {
    pub fn of(within: IStr) -> Self {
        Self { within, member: None }
    }

    pub fn member(within: IStr, member: IStr) -> Self {
        Self {
            within,
            member: Some(member),
        }
    }
}

impl std::fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.member {
            Some(m) => write!(f, "`{}.{}`", self.within, m),
            None => write!(f, "`{}`", self.within),
        }
    }
}
