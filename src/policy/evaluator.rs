//! Condition evaluation against a resolved attribute context
//!
//! Pure conjunction with left-to-right short-circuit. A condition whose
//! attribute is absent from the context evaluates false for every operator,
//! including `not_equals`. Missing data fails safe toward deny rather than
//! proving a negative.

use super::{Condition, Operator, Policy};
use crate::attributes::AuthorizationContext;
use crate::types::Value;
use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, warn};

/// Stateless evaluator, apart from a compiled-regex cache keyed by pattern.
#[derive(Default)]
pub struct PolicyEvaluator {
    regex_cache: DashMap<String, Regex>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether all of the policy's conditions hold in `ctx`.
    pub fn matches(&self, policy: &Policy, ctx: &AuthorizationContext) -> bool {
        policy
            .conditions
            .iter()
            .all(|condition| self.condition_holds(condition, ctx))
    }

    fn condition_holds(&self, condition: &Condition, ctx: &AuthorizationContext) -> bool {
        let Some(actual) = ctx.get(&condition.attribute) else {
            debug!(attribute = %condition.attribute, "attribute absent; condition fails");
            return false;
        };

        match condition.operator {
            Operator::Equals => values_equal(actual, &condition.value),
            Operator::NotEquals => !values_equal(actual, &condition.value),
            Operator::In => match (&condition.value, actual) {
                (Value::StringSet(set), Value::String(s)) => set.contains(s),
                _ => false,
            },
            Operator::NotIn => match (&condition.value, actual) {
                (Value::StringSet(set), Value::String(s)) => !set.contains(s),
                _ => false,
            },
            Operator::Contains => match (actual, &condition.value) {
                (Value::StringSet(set), Value::String(needle)) => set.contains(needle),
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
                _ => false,
            },
            Operator::GreaterThan => match (actual, &condition.value) {
                (Value::Number(a), Value::Number(b)) => a > b,
                _ => false,
            },
            Operator::LessThan => match (actual, &condition.value) {
                (Value::Number(a), Value::Number(b)) => a < b,
                _ => false,
            },
            Operator::Regex => match (actual, &condition.value) {
                (Value::String(s), Value::String(pattern)) => self.regex_matches(pattern, s),
                _ => false,
            },
            Operator::TimeRange => match (actual, &condition.value) {
                (Value::Number(hour), Value::Range(start, end)) => {
                    hour_in_range(*hour, *start, *end)
                }
                _ => false,
            },
        }
    }

    fn regex_matches(&self, pattern: &str, value: &str) -> bool {
        if let Some(compiled) = self.regex_cache.get(pattern) {
            return compiled.is_match(value);
        }
        match Regex::new(pattern) {
            Ok(compiled) => {
                let result = compiled.is_match(value);
                self.regex_cache.insert(pattern.to_string(), compiled);
                result
            }
            // Validation compiles patterns at add time, so this only fires
            // for policies injected around the store contract
            Err(err) => {
                warn!(pattern, error = %err, "regex failed to compile at evaluation time");
                false
            }
        }
    }
}

/// Inclusive hour range with wraparound for ranges crossing midnight,
/// e.g. [22, 6] covers 22:00–23:59 and 00:00–06:59.
fn hour_in_range(hour: f64, start: f64, end: f64) -> bool {
    if start <= end {
        (start..=end).contains(&hour)
    } else {
        hour >= start || hour <= end
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}
