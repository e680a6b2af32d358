use colored::*;

use crate::{
    ast::{EdgeKind, NodeInfo},
    helper::interner::IStr,
    types::{FieldType, MethodSignature},
};

/// Everything the composition compiler can reject.
///
/// Every variant names exactly one offending site. There is no aggregation:
/// the first problem found is the one reported.
#[derive(Clone, Debug, PartialEq)]
pub enum CompilationError {
    /// A constructed object was consumed by a second composition edge
    DuplicateComposition {
        target: IStr,
        first_use: NodeInfo,
        second_use: NodeInfo,
    },

    NonConstantCompositionTarget {
        site: NodeInfo,
        kind: EdgeKind,
        expression: IStr,
    },

    /// A body addresses storage outside of the frame its method was resolved in
    LayoutViolation {
        site: NodeInfo,
        slot: i64,
        frame_start: u32,
        frame_size: u32,
    },

    MissingCase {
        interface: IStr,
        candidate: IStr,
        requirement: Requirement,
        reason: MismatchReason,
    },

    /// Two sibling regions bring the same name and the child did not settle it
    AmbiguousOverride {
        site: NodeInfo,
        member: IStr,
        first_region: IStr,
        second_region: IStr,
    },

    MultipleExtend {
        site: NodeInfo,
    },

    UnresolvedMember {
        site: NodeInfo,
        member: IStr,
        kind: MemberKind,
    },

    ArityMismatch {
        site: NodeInfo,
        member: IStr,
        expected: usize,
        found: usize,
    },

    OverrideMismatch {
        site: NodeInfo,
        member: IStr,
        inherited: String,
        declared: String,
    },

    TypeMismatch {
        site: NodeInfo,
        expected: FieldType,
        found: FieldType,
    },

    /// A tuple projection whose index is past the tuple, or whose operand is
    /// not a tuple at all
    BadProjection {
        site: NodeInfo,
        index: u32,
        found: FieldType,
    },

    ConstWithoutValue {
        site: NodeInfo,
    },

    ImmutableStore {
        site: NodeInfo,
        field: IStr,
    },

    /// A monomorphized parameter was handed a value of another concrete type
    ConcreteMismatch {
        site: NodeInfo,
        expected: IStr,
        found: IStr,
    },

    /// Only raised by the evaluation backend, never by compilation
    Runtime {
        reason: String,
    },
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::IntoStaticStr,
)]
pub enum ErrorKind {
    DuplicateCompositionError,
    NonConstantCompositionTargetError,
    LayoutViolationError,
    MissingCaseError,
    AmbiguousOverrideError,
    MultipleExtendError,
    UnresolvedMemberError,
    ArityMismatchError,
    OverrideMismatchError,
    TypeMismatchError,
    BadProjectionError,
    ConstWithoutValueError,
    ImmutableStoreError,
    ConcreteMismatchError,
    RuntimeError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Requirement {
    Field(IStr),
    Method(IStr),
}

#[derive(Clone, Debug, PartialEq)]
pub enum MismatchReason {
    Absent,
    FieldType { expected: FieldType, found: FieldType },
    NotConstant,
    NotMutable,
    Signature { expected: MethodSignature, found: MethodSignature },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum MemberKind {
    #[strum(serialize = "field")]
    Field,
    #[strum(serialize = "method")]
    Method,
    #[strum(serialize = "base method")]
    Base,
    #[strum(serialize = "parameter")]
    Parameter,
}

pub type CompileResult<T> = Result<T, CompilationError>;

impl CompilationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateComposition { .. } => ErrorKind::DuplicateCompositionError,
            Self::NonConstantCompositionTarget { .. } => {
                ErrorKind::NonConstantCompositionTargetError
            }
            Self::LayoutViolation { .. } => ErrorKind::LayoutViolationError,
            Self::MissingCase { .. } => ErrorKind::MissingCaseError,
            Self::AmbiguousOverride { .. } => ErrorKind::AmbiguousOverrideError,
            Self::MultipleExtend { .. } => ErrorKind::MultipleExtendError,
            Self::UnresolvedMember { .. } => ErrorKind::UnresolvedMemberError,
            Self::ArityMismatch { .. } => ErrorKind::ArityMismatchError,
            Self::OverrideMismatch { .. } => ErrorKind::OverrideMismatchError,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatchError,
            Self::BadProjection { .. } => ErrorKind::BadProjectionError,
            Self::ConstWithoutValue { .. } => ErrorKind::ConstWithoutValueError,
            Self::ImmutableStore { .. } => ErrorKind::ImmutableStoreError,
            Self::ConcreteMismatch { .. } => ErrorKind::ConcreteMismatchError,
            Self::Runtime { .. } => ErrorKind::RuntimeError,
        }
    }

    /// The single site this error is reported against, if it has one.
    pub fn site(&self) -> Option<NodeInfo> {
        match self {
            Self::DuplicateComposition { second_use, .. } => Some(*second_use),
            Self::MissingCase { candidate, requirement, .. } => Some(match requirement {
                Requirement::Field(n) | Requirement::Method(n) => NodeInfo::member(*candidate, *n),
            }),
            Self::NonConstantCompositionTarget { site, .. }
            | Self::LayoutViolation { site, .. }
            | Self::AmbiguousOverride { site, .. }
            | Self::MultipleExtend { site }
            | Self::UnresolvedMember { site, .. }
            | Self::ArityMismatch { site, .. }
            | Self::OverrideMismatch { site, .. }
            | Self::TypeMismatch { site, .. }
            | Self::BadProjection { site, .. }
            | Self::ConstWithoutValue { site }
            | Self::ImmutableStore { site, .. }
            | Self::ConcreteMismatch { site, .. } => Some(*site),
            Self::Runtime { .. } => None,
        }
    }

    pub fn runtime<S: Into<String>>(reason: S) -> Self {
        Self::Runtime { reason: reason.into() }
    }

    pub fn report(&self) {
        let ep = ErrorPrinter {};

        ep.headline(self.kind(), &self.to_string());

        match self {
            Self::DuplicateComposition { first_use, .. } => {
                ep.note_line(format!(
                    "it was first consumed by {first_use}; \
                     construct a separate instance for each composition"
                ));
            }
            Self::AmbiguousOverride { member, .. } => {
                ep.note_line(format!(
                    "declare `{member}` directly in the composing object to pick one"
                ));
            }
            Self::MissingCase {
                requirement: Requirement::Field(n),
                reason: MismatchReason::NotConstant,
                ..
            } => {
                ep.note_line(format!("`{n}` must be declared `const` with a literal value"));
            }
            Self::LayoutViolation { .. } => {
                ep.note_line(
                    "all offsets are compile-time constants, so this reference can never be valid"
                        .to_owned(),
                );
            }
            _ => (),
        }

        ep.print_bar();
    }
}

impl std::fmt::Display for CompilationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateComposition { target, second_use, .. } => write!(
                f,
                "object `{target}` is used as a composition target a second time in {second_use}"
            ),
            Self::NonConstantCompositionTarget { site, kind, expression } => write!(
                f,
                "{kind} in {site} needs an object constructed at compile time, \
                 but got `{expression}`"
            ),
            Self::LayoutViolation { site, slot, frame_start, frame_size } => write!(
                f,
                "{site} addresses slot {slot}, outside its frame [{frame_start}..{})",
                *frame_start as u64 + *frame_size as u64
            ),
            Self::MissingCase { interface, candidate, requirement, reason } => {
                let (what, name) = match requirement {
                    Requirement::Field(n) => ("field", n),
                    Requirement::Method(n) => ("method", n),
                };
                write!(f, "`{candidate}` does not satisfy `{interface}`: {what} `{name}` ")?;
                match reason {
                    MismatchReason::Absent => write!(f, "is missing"),
                    MismatchReason::FieldType { expected, found } => {
                        write!(f, "has type {found}, expected {expected}")
                    }
                    MismatchReason::NotConstant => write!(f, "is not a compile-time constant"),
                    MismatchReason::NotMutable => write!(f, "is not mutable"),
                    MismatchReason::Signature { expected, found } => {
                        write!(f, "has signature {found}, expected {expected}")
                    }
                }
            }
            Self::AmbiguousOverride { site, member, first_region, second_region } => write!(
                f,
                "`{member}` in {site} is provided by both `{first_region}` and `{second_region}`"
            ),
            Self::MultipleExtend { site } => write!(f, "{site} has more than one @Extend"),
            Self::UnresolvedMember { site, member, kind } => {
                write!(f, "{site} refers to {kind} `{member}`, which does not exist there")
            }
            Self::ArityMismatch { site, member, expected, found } => write!(
                f,
                "{site} calls `{member}` with {found} arguments, but it takes {expected}"
            ),
            Self::OverrideMismatch { site, member, inherited, declared } => write!(
                f,
                "{site} redeclares `{member}` as {declared}, but it is inherited as {inherited}"
            ),
            Self::TypeMismatch { site, expected, found } => {
                write!(f, "{site} is given a value of type {found}, expected {expected}")
            }
            Self::BadProjection { site, index, found } => {
                write!(f, "{site} takes element .{index} of a value of type {found}")
            }
            Self::ConstWithoutValue { site } => {
                write!(f, "{site} is const but has no literal value")
            }
            Self::ImmutableStore { site, field } => {
                write!(f, "{site} writes to `{field}`, which is not declared mut")
            }
            Self::ConcreteMismatch { site, expected, found } => {
                write!(f, "{site} expects exactly `{expected}`, but was given a `{found}`")
            }
            Self::Runtime { reason } => write!(f, "evaluation failed: {reason}"),
        }
    }
}

impl std::error::Error for CompilationError {}

pub struct ErrorPrinter {}

impl ErrorPrinter {
    pub fn headline(&self, kind: ErrorKind, message: &str) {
        let kind: &'static str = kind.into();
        eprintln!(
            "{}[{}]: {}",
            "error".bold().bright_red(),
            kind.bright_red(),
            message.bold().bright_yellow()
        );
    }

    pub fn note_line(&self, line: String) {
        eprintln!(
            "{}",
            "This additional information was given for solving the issue:".yellow().bold()
        );
        eprintln!("   {} {}", ">".bright_blue().bold(), line.as_str().bright_yellow().bold());
    }

    pub fn print_bar(&self) {
        eprintln!();
        if let Some((w, _)) = term_size::dimensions() {
            eprintln!("{}", "―".repeat(w).as_str().cyan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::interner::Internable;

    #[test]
    fn missing_case_names_the_requirement() {
        let e = CompilationError::MissingCase {
            interface: "Quacks".intern(),
            candidate: "Rock".intern(),
            requirement: Requirement::Method("quack".intern()),
            reason: MismatchReason::Absent,
        };

        assert_eq!(e.kind(), ErrorKind::MissingCaseError);
        assert_eq!(e.to_string(), "`Rock` does not satisfy `Quacks`: method `quack` is missing");
        assert_eq!(e.site(), Some(NodeInfo::member("Rock".intern(), "quack".intern())));
    }

    #[test]
    fn kind_names_match_the_taxonomy() {
        let e = CompilationError::MultipleExtend { site: NodeInfo::of("X".intern()) };
        assert_eq!(e.kind().to_string(), "MultipleExtendError");
    }
}
