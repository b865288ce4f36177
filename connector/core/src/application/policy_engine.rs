// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Policy Evaluation Engine
//!
//! Walks a [`Policy`] tree and reports rule problems, and re-evaluates a
//! resource manifest against the policy before provisioning. Evaluation is
//! pure and synchronous: invalidity is a normal return value, never an
//! error, and a missing function registration degrades to a skip.
//!
//! Function registries are namespaced per rule scope — a key registered for
//! permissions is invisible to prohibitions and duties. Atomic constraints
//! without a registered function fall back to literal comparison of the
//! left-operand key against the right operand, including ordered
//! comparisons (numeric when the right operand is a number and the left
//! parses as one, lexicographic when both are strings).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::policy::{AtomicConstraint, Constraint, Operator, Policy, Rule};
use crate::domain::provision::{ResourceDefinition, ResourceManifest};

/// Evaluation function for an atomic constraint key, in rule context.
pub type RuleFunction = dyn Fn(Operator, &Value, &Rule) -> bool + Send + Sync;

/// Evaluation function applied to a resource definition. May return a
/// rewritten copy of the definition which replaces the working copy for the
/// functions that follow, or a failure message.
pub type ResourceDefinitionFunction =
    dyn Fn(Operator, &Value, &Rule, &ResourceDefinition) -> Result<Option<ResourceDefinition>, String>
        + Send
        + Sync;

/// Function namespace selector; permission, prohibition and duty functions
/// never see each other's registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleScope {
    Permission,
    Prohibition,
    Duty,
}

/// One violated rule, with the offending rule attached.
#[derive(Debug, Clone)]
pub struct RuleProblem {
    pub rule: Rule,
    pub description: String,
}

/// Result of evaluating a whole policy. Valid iff no problems were
/// recorded anywhere in the tree.
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluationResult {
    problems: Vec<RuleProblem>,
}

impl PolicyEvaluationResult {
    pub fn valid(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn problems(&self) -> &[RuleProblem] {
        &self.problems
    }
}

/// Constraint-tree evaluator with pluggable per-key functions.
#[derive(Default)]
pub struct PolicyEvaluator {
    rule_functions: HashMap<RuleScope, HashMap<String, Arc<RuleFunction>>>,
    definition_functions: HashMap<RuleScope, HashMap<(String, String), Arc<ResourceDefinitionFunction>>>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_permission_function(
        &mut self,
        key: impl Into<String>,
        function: impl Fn(Operator, &Value, &Rule) -> bool + Send + Sync + 'static,
    ) {
        self.register_rule_function(RuleScope::Permission, key, function);
    }

    pub fn register_prohibition_function(
        &mut self,
        key: impl Into<String>,
        function: impl Fn(Operator, &Value, &Rule) -> bool + Send + Sync + 'static,
    ) {
        self.register_rule_function(RuleScope::Prohibition, key, function);
    }

    pub fn register_duty_function(
        &mut self,
        key: impl Into<String>,
        function: impl Fn(Operator, &Value, &Rule) -> bool + Send + Sync + 'static,
    ) {
        self.register_rule_function(RuleScope::Duty, key, function);
    }

    fn register_rule_function(
        &mut self,
        scope: RuleScope,
        key: impl Into<String>,
        function: impl Fn(Operator, &Value, &Rule) -> bool + Send + Sync + 'static,
    ) {
        self.rule_functions
            .entry(scope)
            .or_default()
            .insert(key.into(), Arc::new(function));
    }

    /// Register a function applied to resource definitions of `kind` when a
    /// permission constraint on `key` is evaluated against a manifest.
    pub fn register_permission_definition_function(
        &mut self,
        key: impl Into<String>,
        kind: impl Into<String>,
        function: impl Fn(Operator, &Value, &Rule, &ResourceDefinition) -> Result<Option<ResourceDefinition>, String>
            + Send
            + Sync
            + 'static,
    ) {
        self.register_definition_function(RuleScope::Permission, key, kind, function);
    }

    pub fn register_prohibition_definition_function(
        &mut self,
        key: impl Into<String>,
        kind: impl Into<String>,
        function: impl Fn(Operator, &Value, &Rule, &ResourceDefinition) -> Result<Option<ResourceDefinition>, String>
            + Send
            + Sync
            + 'static,
    ) {
        self.register_definition_function(RuleScope::Prohibition, key, kind, function);
    }

    pub fn register_duty_definition_function(
        &mut self,
        key: impl Into<String>,
        kind: impl Into<String>,
        function: impl Fn(Operator, &Value, &Rule, &ResourceDefinition) -> Result<Option<ResourceDefinition>, String>
            + Send
            + Sync
            + 'static,
    ) {
        self.register_definition_function(RuleScope::Duty, key, kind, function);
    }

    fn register_definition_function(
        &mut self,
        scope: RuleScope,
        key: impl Into<String>,
        kind: impl Into<String>,
        function: impl Fn(Operator, &Value, &Rule, &ResourceDefinition) -> Result<Option<ResourceDefinition>, String>
            + Send
            + Sync
            + 'static,
    ) {
        self.definition_functions
            .entry(scope)
            .or_default()
            .insert((key.into(), kind.into()), Arc::new(function));
    }

    /// Evaluate the whole policy tree. A permission's duties are checked
    /// before its own constraints; a prohibition whose constraints hold is
    /// a violation.
    pub fn evaluate(&self, policy: &Policy) -> PolicyEvaluationResult {
        let mut problems = Vec::new();

        for permission in &policy.permissions {
            let rule = Rule::Permission(permission.clone());
            for duty in &permission.duties {
                let duty_rule = Rule::Duty(duty.clone());
                if !self.constraints_hold(RuleScope::Duty, &duty.constraints, &duty_rule) {
                    problems.push(RuleProblem {
                        rule: rule.clone(),
                        description: format!(
                            "duty '{}' of permission '{}' is not fulfilled",
                            duty.action.kind, permission.action.kind
                        ),
                    });
                }
            }
            if !self.constraints_hold(RuleScope::Permission, &permission.constraints, &rule) {
                problems.push(RuleProblem {
                    rule: rule.clone(),
                    description: format!(
                        "permission constraints for action '{}' are not satisfied",
                        permission.action.kind
                    ),
                });
            }
        }

        for prohibition in &policy.prohibitions {
            let rule = Rule::Prohibition(prohibition.clone());
            if self.constraints_hold(RuleScope::Prohibition, &prohibition.constraints, &rule) {
                problems.push(RuleProblem {
                    rule: rule.clone(),
                    description: format!(
                        "prohibited condition for action '{}' holds",
                        prohibition.action.kind
                    ),
                });
            }
        }

        for obligation in &policy.obligations {
            let rule = Rule::Duty(obligation.clone());
            if !self.constraints_hold(RuleScope::Duty, &obligation.constraints, &rule) {
                problems.push(RuleProblem {
                    rule: rule.clone(),
                    description: format!(
                        "obligation for action '{}' is not fulfilled",
                        obligation.action.kind
                    ),
                });
            }
        }

        PolicyEvaluationResult { problems }
    }

    /// Re-evaluate every manifest definition against the policy's
    /// definition-typed functions. Matching functions run in rule order and
    /// may chain rewrites of the working copy; definitions whose kind has no
    /// registration for a key are skipped, not failed. The manifest fails as
    /// a whole iff any definition collected a failure.
    pub fn evaluate_manifest(
        &self,
        manifest: &ResourceManifest,
        policy: &Policy,
    ) -> Result<ResourceManifest, Vec<String>> {
        let mut updated = Vec::with_capacity(manifest.definitions.len());
        let mut failures = Vec::new();

        for definition in &manifest.definitions {
            let mut working = definition.clone();

            for permission in &policy.permissions {
                let rule = Rule::Permission(permission.clone());
                self.apply_definition_functions(
                    RuleScope::Permission,
                    &permission.constraints,
                    &rule,
                    &mut working,
                    &mut failures,
                );
                for duty in &permission.duties {
                    let duty_rule = Rule::Duty(duty.clone());
                    self.apply_definition_functions(
                        RuleScope::Duty,
                        &duty.constraints,
                        &duty_rule,
                        &mut working,
                        &mut failures,
                    );
                }
            }
            for prohibition in &policy.prohibitions {
                let rule = Rule::Prohibition(prohibition.clone());
                self.apply_definition_functions(
                    RuleScope::Prohibition,
                    &prohibition.constraints,
                    &rule,
                    &mut working,
                    &mut failures,
                );
            }
            for obligation in &policy.obligations {
                let rule = Rule::Duty(obligation.clone());
                self.apply_definition_functions(
                    RuleScope::Duty,
                    &obligation.constraints,
                    &rule,
                    &mut working,
                    &mut failures,
                );
            }

            updated.push(working);
        }

        if failures.is_empty() {
            Ok(ResourceManifest::new(updated))
        } else {
            Err(failures)
        }
    }

    fn apply_definition_functions(
        &self,
        scope: RuleScope,
        constraints: &[Constraint],
        rule: &Rule,
        working: &mut ResourceDefinition,
        failures: &mut Vec<String>,
    ) {
        for constraint in constraints {
            match constraint {
                Constraint::Atomic(atomic) => {
                    let function = self.definition_functions.get(&scope).and_then(|functions| {
                        functions.get(&(atomic.left_operand.clone(), working.kind.clone()))
                    });
                    let Some(function) = function else {
                        continue;
                    };
                    match function(atomic.operator, &atomic.right_operand, rule, working) {
                        Ok(Some(rewritten)) => *working = rewritten,
                        Ok(None) => {}
                        Err(message) => failures.push(message),
                    }
                }
                Constraint::And(children)
                | Constraint::Or(children)
                | Constraint::Xone(children) => {
                    self.apply_definition_functions(scope, children, rule, working, failures);
                }
            }
        }
    }

    /// A rule's constraint list holds iff every constraint in it is valid.
    fn constraints_hold(&self, scope: RuleScope, constraints: &[Constraint], rule: &Rule) -> bool {
        constraints
            .iter()
            .all(|constraint| self.constraint_valid(scope, constraint, rule))
    }

    fn constraint_valid(&self, scope: RuleScope, constraint: &Constraint, rule: &Rule) -> bool {
        match constraint {
            Constraint::Atomic(atomic) => self.atomic_valid(scope, atomic, rule),
            Constraint::And(children) => children
                .iter()
                .all(|child| self.constraint_valid(scope, child, rule)),
            Constraint::Or(children) => children
                .iter()
                .any(|child| self.constraint_valid(scope, child, rule)),
            Constraint::Xone(children) => {
                let matches = children
                    .iter()
                    .filter(|child| self.constraint_valid(scope, child, rule))
                    .count();
                matches == 1
            }
        }
    }

    fn atomic_valid(&self, scope: RuleScope, atomic: &AtomicConstraint, rule: &Rule) -> bool {
        if let Some(function) = self
            .rule_functions
            .get(&scope)
            .and_then(|functions| functions.get(&atomic.left_operand))
        {
            return function(atomic.operator, &atomic.right_operand, rule);
        }
        builtin_compare(&atomic.left_operand, atomic.operator, &atomic.right_operand)
    }
}

/// Literal comparison fallback for atomic constraints without a registered
/// function.
fn builtin_compare(left: &str, operator: Operator, right: &Value) -> bool {
    match operator {
        Operator::Eq => right.as_str() == Some(left),
        Operator::Neq => right.as_str() != Some(left),
        Operator::In => right
            .as_array()
            .is_some_and(|values| values.iter().any(|value| value.as_str() == Some(left))),
        Operator::Gt | Operator::Geq | Operator::Lt | Operator::Leq => {
            ordered_compare(left, operator, right)
        }
    }
}

fn ordered_compare(left: &str, operator: Operator, right: &Value) -> bool {
    let ordering = if let Some(right_number) = right.as_f64() {
        match left.parse::<f64>() {
            Ok(left_number) => left_number.partial_cmp(&right_number),
            Err(_) => None,
        }
    } else {
        right.as_str().map(|right_str| left.cmp(right_str))
    };

    let Some(ordering) = ordering else {
        return false;
    };
    match operator {
        Operator::Gt => ordering.is_gt(),
        Operator::Geq => ordering.is_ge(),
        Operator::Lt => ordering.is_lt(),
        Operator::Leq => ordering.is_le(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::{Action, Duty, Permission, Prohibition};
    use serde_json::json;

    fn valid_atomic() -> Constraint {
        Constraint::Atomic(AtomicConstraint::new("region", Operator::Eq, json!("region")))
    }

    fn invalid_atomic() -> Constraint {
        Constraint::Atomic(AtomicConstraint::new("region", Operator::Eq, json!("elsewhere")))
    }

    fn permission_with(constraints: Vec<Constraint>) -> Policy {
        Policy {
            permissions: vec![Permission {
                action: Action::new("use"),
                constraints,
                duties: vec![],
            }],
            ..Policy::default()
        }
    }

    #[test]
    fn xone_requires_exactly_one_valid_child() {
        let evaluator = PolicyEvaluator::new();

        let one = permission_with(vec![Constraint::Xone(vec![valid_atomic(), invalid_atomic()])]);
        assert!(evaluator.evaluate(&one).valid());

        let two = permission_with(vec![Constraint::Xone(vec![valid_atomic(), valid_atomic()])]);
        assert!(!evaluator.evaluate(&two).valid());

        let zero = permission_with(vec![Constraint::Xone(vec![invalid_atomic(), invalid_atomic()])]);
        assert!(!evaluator.evaluate(&zero).valid());
    }

    #[test]
    fn and_or_composites() {
        let evaluator = PolicyEvaluator::new();

        let and = permission_with(vec![Constraint::And(vec![valid_atomic(), invalid_atomic()])]);
        assert!(!evaluator.evaluate(&and).valid());

        let or = permission_with(vec![Constraint::Or(vec![valid_atomic(), invalid_atomic()])]);
        assert!(evaluator.evaluate(&or).valid());
    }

    #[test]
    fn prohibition_inverts_constraint_semantics() {
        let evaluator = PolicyEvaluator::new();
        let constraint = valid_atomic();

        let prohibition = Policy {
            prohibitions: vec![Prohibition {
                action: Action::new("distribute"),
                constraints: vec![constraint.clone()],
            }],
            ..Policy::default()
        };
        let result = evaluator.evaluate(&prohibition);
        assert_eq!(result.problems().len(), 1);

        // The same constraint under a permission raises no problem.
        let permission = permission_with(vec![constraint]);
        assert!(evaluator.evaluate(&permission).valid());
    }

    #[test]
    fn duty_failure_fails_the_permission() {
        let evaluator = PolicyEvaluator::new();
        let policy = Policy {
            permissions: vec![Permission {
                action: Action::new("use"),
                constraints: vec![valid_atomic()],
                duties: vec![Duty {
                    action: Action::new("notify"),
                    constraints: vec![invalid_atomic()],
                }],
            }],
            ..Policy::default()
        };
        let result = evaluator.evaluate(&policy);
        assert_eq!(result.problems().len(), 1);
        assert!(result.problems()[0].description.contains("notify"));
    }

    #[test]
    fn registered_function_takes_precedence_per_scope() {
        let mut evaluator = PolicyEvaluator::new();
        evaluator.register_permission_function("region", |_, _, _| true);

        // The permission namespace sees the function; prohibitions fall back
        // to the literal comparison, which does not hold here.
        let policy = Policy {
            permissions: vec![Permission {
                action: Action::new("use"),
                constraints: vec![invalid_atomic()],
                duties: vec![],
            }],
            prohibitions: vec![Prohibition {
                action: Action::new("distribute"),
                constraints: vec![invalid_atomic()],
            }],
            ..Policy::default()
        };
        assert!(evaluator.evaluate(&policy).valid());
    }

    #[test]
    fn ordered_operators_compare_numbers_and_strings() {
        assert!(builtin_compare("5", Operator::Gt, &json!(3)));
        assert!(!builtin_compare("2", Operator::Gt, &json!(3)));
        assert!(builtin_compare("3", Operator::Geq, &json!(3)));
        assert!(builtin_compare("2.5", Operator::Lt, &json!(3)));
        assert!(builtin_compare("3", Operator::Leq, &json!(3.0)));

        // Lexicographic when both sides are strings.
        assert!(builtin_compare("beta", Operator::Gt, &json!("alpha")));
        assert!(!builtin_compare("alpha", Operator::Gt, &json!("beta")));

        // Mixed or unparsable operands never hold.
        assert!(!builtin_compare("not-a-number", Operator::Gt, &json!(3)));
        assert!(!builtin_compare("5", Operator::Gt, &json!(true)));
    }

    #[test]
    fn in_operator_checks_membership() {
        assert!(builtin_compare("eu", Operator::In, &json!(["eu", "us"])));
        assert!(!builtin_compare("apac", Operator::In, &json!(["eu", "us"])));
    }

    #[test]
    fn manifest_functions_chain_rewrites() {
        let mut evaluator = PolicyEvaluator::new();
        evaluator.register_permission_definition_function(
            "encryption",
            "blob-container",
            |_, right, _, definition| {
                let mut updated = definition.clone();
                updated.attributes["encryption"] = right.clone();
                Ok(Some(updated))
            },
        );
        evaluator.register_duty_definition_function(
            "retention",
            "blob-container",
            |_, right, _, definition| {
                let mut updated = definition.clone();
                updated.attributes["retention_days"] = right.clone();
                Ok(Some(updated))
            },
        );

        let policy = Policy {
            permissions: vec![Permission {
                action: Action::new("use"),
                constraints: vec![Constraint::Atomic(AtomicConstraint::new(
                    "encryption",
                    Operator::Eq,
                    json!("aes256"),
                ))],
                duties: vec![Duty {
                    action: Action::new("retain"),
                    constraints: vec![Constraint::Atomic(AtomicConstraint::new(
                        "retention",
                        Operator::Eq,
                        json!(30),
                    ))],
                }],
            }],
            ..Policy::default()
        };

        let manifest = ResourceManifest::new(vec![ResourceDefinition::new(
            "blob-container",
            json!({"container": "out"}),
        )]);

        let updated = evaluator.evaluate_manifest(&manifest, &policy).unwrap();
        let attributes = &updated.definitions[0].attributes;
        assert_eq!(attributes["encryption"], json!("aes256"));
        assert_eq!(attributes["retention_days"], json!(30));
    }

    #[test]
    fn manifest_failures_aggregate_across_definitions() {
        let mut evaluator = PolicyEvaluator::new();
        evaluator.register_permission_definition_function(
            "encryption",
            "blob-container",
            |_, _, _, definition| Err(format!("definition {} rejected", definition.id)),
        );

        let policy = permission_with(vec![Constraint::Atomic(AtomicConstraint::new(
            "encryption",
            Operator::Eq,
            json!("aes256"),
        ))]);

        let manifest = ResourceManifest::new(vec![
            ResourceDefinition::new("blob-container", json!({})),
            ResourceDefinition::new("blob-container", json!({})),
            // No function registered for this kind: skipped, not failed.
            ResourceDefinition::new("sas-token", json!({})),
        ]);

        let failures = evaluator.evaluate_manifest(&manifest, &policy).unwrap_err();
        assert_eq!(failures.len(), 2);
    }
}
