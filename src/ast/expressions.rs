use crate::helper::interner::IStr;
use crate::types::Value;

/// A method body as the front end hands it over: every reference is still
/// by name. `lir::lower` resolves names to slots once a layout exists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Literal(Value),

    /// Reads a named parameter of the enclosing method
    Param(IStr),

    /// `this.name`
    Field(IStr),

    /// `this.name = value`, evaluates to unit
    Store(IStr, Box<Expr>),

    /// `this.name(args)`, late bound through the concrete type's table
    SelfCall(IStr, Vec<Expr>),

    /// `base.name(args)`, bound at compile time to the extend parent's entry
    BaseCall(IStr, Vec<Expr>),

    Intrinsic(Intrinsic, Vec<Expr>),

    /// Reads element `.1` of a tuple valued expression
    Project(Box<Expr>, u32),

    If(Box<Expr>, Box<Expr>, Box<Expr>),

    /// Evaluates each in turn, producing the last (or unit when empty)
    Seq(Vec<Expr>),

    /// Unchecked, frame-relative slot read. This is the language's escape
    /// hatch past named fields; out-of-frame indices are rejected statically.
    RawSlot(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Intrinsic {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "concat")]
    Concat,
    #[strum(serialize = "upper")]
    Upper,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "tuple")]
    Tuple,
}

impl Expr {
    pub fn lit(v: Value) -> Expr {
        Expr::Literal(v)
    }

    pub fn text(s: &str) -> Expr {
        Expr::Literal(Value::str(s))
    }

    pub fn param<N: Into<IStr>>(name: N) -> Expr {
        Expr::Param(name.into())
    }

    pub fn field<N: Into<IStr>>(name: N) -> Expr {
        Expr::Field(name.into())
    }

    pub fn store<N: Into<IStr>>(name: N, value: Expr) -> Expr {
        Expr::Store(name.into(), Box::new(value))
    }

    pub fn call<N: Into<IStr>>(name: N, args: Vec<Expr>) -> Expr {
        Expr::SelfCall(name.into(), args)
    }

    pub fn base<N: Into<IStr>>(name: N, args: Vec<Expr>) -> Expr {
        Expr::BaseCall(name.into(), args)
    }

    pub fn op(which: Intrinsic, args: Vec<Expr>) -> Expr {
        Expr::Intrinsic(which, args)
    }

    pub fn project(of: Expr, index: u32) -> Expr {
        Expr::Project(Box::new(of), index)
    }

    pub fn when(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::If(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    /// Calls `visit` on this expression and every subexpression, parents first.
    pub fn walk<'a, F: FnMut(&'a Expr)>(&'a self, visit: &mut F) {
        visit(self);
        match self {
            Expr::Literal(_) | Expr::Param(_) | Expr::Field(_) | Expr::RawSlot(_) => (),
            Expr::Store(_, v) | Expr::Project(v, _) => v.walk(visit),
            Expr::SelfCall(_, args)
            | Expr::BaseCall(_, args)
            | Expr::Intrinsic(_, args)
            | Expr::Seq(args) => args.iter().for_each(|a| a.walk(visit)),
            Expr::If(c, t, e) => {
                c.walk(visit);
                t.walk(visit);
                e.walk(visit);
            }
        }
    }
}
