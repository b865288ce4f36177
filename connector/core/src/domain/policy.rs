// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Usage Policy Model
//!
//! ODRL-style policy tree: a [`Policy`] owns ordered lists of permissions,
//! prohibitions and obligations, each guarded by a [`Constraint`] tree.
//! Constraints form a closed sum — atomic leaves plus `and`/`or`/`xone`
//! composites — so evaluation is plain recursive pattern matching rather
//! than a visitor hierarchy.
//!
//! The tree is pure data: evaluation semantics live in
//! `application::policy_engine`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Operator of an atomic constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Neq,
    In,
    Gt,
    Geq,
    Lt,
    Leq,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "EQ",
            Operator::Neq => "NEQ",
            Operator::In => "IN",
            Operator::Gt => "GT",
            Operator::Geq => "GEQ",
            Operator::Lt => "LT",
            Operator::Leq => "LEQ",
        };
        write!(f, "{symbol}")
    }
}

/// Leaf constraint comparing a left operand key against a literal right
/// operand. The left operand doubles as the lookup key for registered
/// evaluation functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicConstraint {
    pub left_operand: String,
    pub operator: Operator,
    pub right_operand: Value,
}

impl AtomicConstraint {
    pub fn new(left_operand: impl Into<String>, operator: Operator, right_operand: Value) -> Self {
        Self {
            left_operand: left_operand.into(),
            operator,
            right_operand,
        }
    }
}

/// Constraint tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    Atomic(AtomicConstraint),
    /// Valid iff all children are valid.
    And(Vec<Constraint>),
    /// Valid iff at least one child is valid.
    Or(Vec<Constraint>),
    /// Valid iff exactly one child is valid.
    Xone(Vec<Constraint>),
}

/// Action a rule refers to, e.g. `use` or `transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: String,
}

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub action: Action,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Duties that must hold for the permission itself to hold.
    #[serde(default)]
    pub duties: Vec<Duty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prohibition {
    pub action: Action,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Duty {
    pub action: Action,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

/// A rule in evaluation context. Cloned into rule problems so a caller can
/// see which rule failed without chasing indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    Permission(Permission),
    Prohibition(Prohibition),
    Duty(Duty),
}

impl Rule {
    pub fn action(&self) -> &Action {
        match self {
            Rule::Permission(p) => &p.action,
            Rule::Prohibition(p) => &p.action,
            Rule::Duty(d) => &d.action,
        }
    }

    pub fn constraints(&self) -> &[Constraint] {
        match self {
            Rule::Permission(p) => &p.constraints,
            Rule::Prohibition(p) => &p.constraints,
            Rule::Duty(d) => &d.constraints,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Rule::Permission(_) => "permission",
            Rule::Prohibition(_) => "prohibition",
            Rule::Duty(_) => "duty",
        }
    }
}

/// Usage policy attached to a contract offer or agreement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub prohibitions: Vec<Prohibition>,
    #[serde(default)]
    pub obligations: Vec<Duty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl Policy {
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }
}
