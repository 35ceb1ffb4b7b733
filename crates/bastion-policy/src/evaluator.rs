//! Policy evaluation.
//!
//! The evaluator collects the candidate policies for a context (indexed by
//! the context's resource keys, plus global policies), orders them by
//! priority with deny policies first, and walks each policy's rules in
//! priority order. The first rule whose conditions all hold decides via its
//! first action. Default is deny: no matching rule means the request is
//! blocked.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::context::{Decision, EvaluationContext, EvaluationResult};
use crate::model::{ActionType, ConditionOperator, Policy, RuleCondition};
use crate::store::PolicyStore;

/// Evaluates contexts against the policies in a store.
#[derive(Clone)]
pub struct PolicyEvaluator {
    store: Arc<PolicyStore>,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    pub async fn evaluate(&self, ctx: &EvaluationContext) -> EvaluationResult {
        let keys = ctx.resource_keys();
        let mut candidates = self.store.candidates(&keys).await;

        // Priority descending; at equal priority deny beats allow, then
        // earlier created_at, then policy_id lexicographic.
        candidates.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.is_deny_flavored().cmp(&a.is_deny_flavored()))
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.policy_id.to_string().cmp(&b.policy_id.to_string()))
        });

        for policy in &candidates {
            if let Some(result) = evaluate_policy(policy, ctx) {
                tracing::debug!(
                    policy = %policy.policy_code,
                    rule = result.matched_rule_id.as_deref().unwrap_or(""),
                    decision = ?result.decision,
                    "policy matched"
                );
                return result;
            }
        }

        EvaluationResult {
            decision: Decision::Deny,
            matched_policy_id: None,
            matched_rule_id: None,
            action_params: None,
            reason: "no policy matched".to_string(),
            timestamp: Utc::now(),
            should_block: true,
        }
    }
}

/// Walk one policy's rules; `None` when nothing matched.
fn evaluate_policy(policy: &Policy, ctx: &EvaluationContext) -> Option<EvaluationResult> {
    let mut rules: Vec<_> = policy.policy_rules.iter().collect();
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));

    for rule in rules {
        if !rule.conditions.iter().all(|c| evaluate_condition(c, ctx)) {
            continue;
        }
        let action = rule.actions.first()?;
        let decision = match action.action_type {
            ActionType::Allow => Decision::Allow,
            ActionType::Deny => Decision::Deny,
            ActionType::LogOnly => Decision::AuditOnly,
            // Parameterized actions permit the call; the caller applies the
            // parameters (redaction, rate limits, approval routing).
            ActionType::RequireApproval
            | ActionType::Redact
            | ActionType::RateLimit
            | ActionType::Modify => Decision::Allow,
        };
        let blocking = policy.enforcement == crate::model::EnforcementMode::Blocking;
        return Some(EvaluationResult {
            decision,
            matched_policy_id: Some(policy.policy_id),
            matched_rule_id: Some(rule.rule_id.clone()),
            action_params: action_params(action.action_type, &action.params),
            reason: format!(
                "rule '{}' of policy '{}' matched",
                rule.rule_id, policy.policy_code
            ),
            timestamp: Utc::now(),
            should_block: decision == Decision::Deny && blocking,
        });
    }
    None
}

fn action_params(action_type: ActionType, params: &Value) -> Option<Value> {
    if params.is_null() && matches!(action_type, ActionType::Allow | ActionType::Deny) {
        return None;
    }
    Some(serde_json::json!({ "type": action_type, "params": params }))
}

/// Evaluate a single condition against the context.
///
/// A missing field fails the condition except for negated operators, where
/// absence counts as not-present.
pub fn evaluate_condition(cond: &RuleCondition, ctx: &EvaluationContext) -> bool {
    let Some(actual) = ctx.lookup(&cond.field) else {
        return cond.operator.matches_on_absence();
    };
    apply_operator(cond.operator, &actual, &cond.value)
}

fn apply_operator(op: ConditionOperator, actual: &Value, expected: &Value) -> bool {
    use ConditionOperator::*;
    match op {
        Eq => values_equal(actual, expected),
        Neq => !values_equal(actual, expected),
        In => expected
            .as_array()
            .is_some_and(|list| list.iter().any(|v| values_equal(actual, v))),
        NotIn => expected
            .as_array()
            .is_some_and(|list| !list.iter().any(|v| values_equal(actual, v))),
        Gt => compare(actual, expected).is_some_and(|o| o == std::cmp::Ordering::Greater),
        Lt => compare(actual, expected).is_some_and(|o| o == std::cmp::Ordering::Less),
        Gte => compare(actual, expected).is_some_and(|o| o != std::cmp::Ordering::Less),
        Lte => compare(actual, expected).is_some_and(|o| o != std::cmp::Ordering::Greater),
        Matches => match regex::Regex::new(&stringify(expected)) {
            Ok(re) => re.is_match(&stringify(actual)),
            Err(e) => {
                tracing::warn!(pattern = %stringify(expected), error = %e, "invalid regex in condition");
                false
            }
        },
        Contains => match actual {
            Value::String(s) => s.contains(&stringify(expected)),
            Value::Array(items) => items.iter().any(|v| values_equal(v, expected)),
            _ => false,
        },
        BeginsWith => stringify(actual).starts_with(&stringify(expected)),
        EndsWith => stringify(actual).ends_with(&stringify(expected)),
        InIpRange => ip_in_ranges(actual, expected),
        NotInIpRange => {
            // Unparsable input must not accidentally satisfy the negation.
            parse_ip(actual).is_some() && !ip_in_ranges(actual, expected)
        }
    }
}

/// Scalar equality with numeric coercion: `3` equals `3.0` and `"3"`.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Ordered comparison: numeric when both sides coerce, chronological when
/// both sides parse as RFC 3339 timestamps, otherwise undefined.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (as_timestamp(a), as_timestamp(b)) {
        return Some(x.cmp(&y));
    }
    None
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?;
    DateTime::parse_from_rfc3339(s).ok().map(|t| t.to_utc())
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_ip(v: &Value) -> Option<IpAddr> {
    v.as_str()?.parse().ok()
}

/// CIDR membership; `expected` is one CIDR string or a list of them. A bare
/// IP on the right-hand side is treated as a host route.
fn ip_in_ranges(actual: &Value, expected: &Value) -> bool {
    let Some(ip) = parse_ip(actual) else {
        return false;
    };
    let ranges: Vec<&Value> = match expected {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    ranges.iter().any(|r| {
        let Some(text) = r.as_str() else {
            return false;
        };
        if let Ok(net) = text.parse::<ipnet::IpNet>() {
            return net.contains(&ip);
        }
        text.parse::<IpAddr>().is_ok_and(|host| host == ip)
    })
}
