//! Ready-made object graphs, used by the binary and by the scenario tests.
//!
//! Every factory constructs a fresh literal on each call, so the result can be
//! consumed by exactly one composition site.

use std::sync::Arc;

use crate::{
    ast::{Expr, FieldInit, Intrinsic, Member, ObjectLiteral},
    types::{FieldType, InterfaceConstraint, Qualifier, Value},
};

pub fn duck() -> Arc<ObjectLiteral> {
    ObjectLiteral::new("Duck")
        .method("quack", vec![], FieldType::Str, Expr::text("quack"))
        .method("waddle", vec![], FieldType::Str, Expr::text("waddle"))
        .finish()
}

/// Extends a fresh `Duck` and shouts whatever it says.
pub fn mad_duck() -> Arc<ObjectLiteral> {
    ObjectLiteral::new("MadDuck")
        .extend(
            &duck(),
            vec![Member::method(
                "quack",
                vec![],
                FieldType::Str,
                Expr::op(Intrinsic::Upper, vec![Expr::base("quack", vec![])]),
            )],
        )
        .finish()
}

pub fn uri_type() -> FieldType {
    FieldType::Tuple(vec![FieldType::Str, FieldType::Str, FieldType::Str])
}

/// The common element constructor. `extra_attributes` adds that many string
/// attributes, which only changes how big the element's region is.
pub fn base_element(extra_attributes: usize) -> Arc<ObjectLiteral> {
    (0..extra_attributes)
        .fold(
            ObjectLiteral::new("BaseElement").field(
                "tag",
                FieldType::Str,
                Qualifier::Let,
                FieldInit::Constant(Value::str("a")),
            ),
            |o, i| o.field(format!("attr{i}"), FieldType::Str, Qualifier::Mut, FieldInit::Deferred),
        )
        .method(
            "open_tag",
            vec![],
            FieldType::Str,
            Expr::op(
                Intrinsic::Concat,
                vec![Expr::text("<"), Expr::field("tag"), Expr::text(">")],
            ),
        )
        .finish()
}

/// Owns one parsed URI, stored as `(scheme, host, path)`.
pub fn element_utils(scheme: &str, host: &str, path: &str) -> Arc<ObjectLiteral> {
    let uri = Value::Tuple(vec![Value::str(scheme), Value::str(host), Value::str(path)]);

    ObjectLiteral::new("ElementUtils")
        .field("uri", uri_type(), Qualifier::Let, FieldInit::Constant(uri))
        .method(
            "href",
            vec![],
            FieldType::Str,
            Expr::op(
                Intrinsic::Concat,
                vec![
                    Expr::project(Expr::field("uri"), 0),
                    Expr::text("://"),
                    Expr::project(Expr::field("uri"), 1),
                    Expr::project(Expr::field("uri"), 2),
                ],
            ),
        )
        .finish()
}

pub fn html_element_with(
    base: &Arc<ObjectLiteral>,
    utils: &Arc<ObjectLiteral>,
) -> Arc<ObjectLiteral> {
    ObjectLiteral::new("HTMLElement")
        .extend(base, vec![])
        .mixin(utils, vec![])
        .field(
            "target",
            FieldType::Str,
            Qualifier::Let,
            FieldInit::Constant(Value::str("_blank")),
        )
        .method(
            "render",
            vec![],
            FieldType::Str,
            Expr::op(
                Intrinsic::Concat,
                vec![
                    Expr::call("open_tag", vec![]),
                    Expr::call("href", vec![]),
                    Expr::text(" target="),
                    Expr::field("target"),
                ],
            ),
        )
        .finish()
}

pub fn html_element() -> Arc<ObjectLiteral> {
    html_element_with(
        &base_element(0),
        &element_utils("https", "example.org", "/index.html"),
    )
}

/// A single mutable integer, the smallest type that qualifies for elision.
pub fn counter() -> Arc<ObjectLiteral> {
    ObjectLiteral::new("Counter")
        .field("count", FieldType::Int, Qualifier::Mut, FieldInit::Constant(Value::Int(0)))
        .method(
            "bump",
            vec![("by", FieldType::Int)],
            FieldType::Int,
            Expr::Seq(vec![
                Expr::store(
                    "count",
                    Expr::op(Intrinsic::Add, vec![Expr::field("count"), Expr::param("by")]),
                ),
                Expr::field("count"),
            ]),
        )
        .method("get", vec![], FieldType::Int, Expr::field("count"))
        .finish()
}

pub fn quacks() -> InterfaceConstraint {
    InterfaceConstraint::new("Quacks").method("quack", [], FieldType::Str)
}

pub fn linkable() -> InterfaceConstraint {
    InterfaceConstraint::new("Linkable")
        .field("uri", uri_type(), Qualifier::Let)
        .method("href", [], FieldType::Str)
}

pub fn tally() -> InterfaceConstraint {
    InterfaceConstraint::new("Tally")
        .field("count", FieldType::Int, Qualifier::Mut)
        .method("bump", [FieldType::Int], FieldType::Int)
}

pub struct Demo {
    pub name: &'static str,
    pub build: fn() -> Arc<ObjectLiteral>,

    /// Method calls made, in order, against a single instance
    pub calls: Vec<(&'static str, Vec<Value>)>,

    pub satisfies: Vec<InterfaceConstraint>,
}

pub fn catalog() -> Vec<Demo> {
    vec![
        Demo {
            name: "duck",
            build: duck,
            calls: vec![("quack", vec![]), ("waddle", vec![])],
            satisfies: vec![quacks()],
        },
        Demo {
            name: "mad_duck",
            build: mad_duck,
            calls: vec![("quack", vec![]), ("waddle", vec![])],
            satisfies: vec![quacks()],
        },
        Demo {
            name: "html_element",
            build: html_element,
            calls: vec![("href", vec![]), ("render", vec![])],
            satisfies: vec![linkable()],
        },
        Demo {
            name: "counter",
            build: counter,
            calls: vec![
                ("bump", vec![Value::Int(2)]),
                ("bump", vec![Value::Int(3)]),
                ("get", vec![]),
            ],
            satisfies: vec![tally()],
        },
    ]
}
