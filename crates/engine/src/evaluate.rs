//! Rule evaluation: matching trigger events against tenant rules.
//!
//! Enabled rules are evaluated in creation order against the event payload
//! and nothing else. A rule that cannot be evaluated (unknown field,
//! malformed predicate) is skipped with a configuration warning; a broken
//! rule must never match, and must never take the whole pass down.

use autopilot_core::{Action, AutomationRule, LockKey, LockKind, TriggerEvent};
use autopilot_storage::{EngineStorage, StorageError};
use tracing::{debug, warn};

/// Entity ids an action for this event will touch, sorted.
///
/// Part of the idempotency-key input, so derivation must be deterministic
/// for logically-identical events.
pub fn target_entity_ids(event: &TriggerEvent) -> Vec<String> {
    let mut ids = Vec::new();
    for field in ["authorization_id", "claim_id"] {
        if let Some(id) = event.payload.get(field).and_then(|v| v.as_str()) {
            ids.push(id.to_string());
        }
    }
    if ids.is_empty() {
        if let Some(payer) = event.payload.get("payer").and_then(|v| v.as_str()) {
            ids.push(format!("payer:{payer}"));
        }
    }
    ids.sort();
    ids
}

/// Derive the lock keys an action needs. Derivation happens here, once,
/// for every rule; call sites never assemble lock keys themselves.
fn lock_keys(rule: &AutomationRule, event: &TriggerEvent, targets: &[String]) -> Vec<LockKey> {
    let mut keys = vec![
        LockKey::new(LockKind::Customer, event.tenant_id.clone()),
        LockKey::new(LockKind::Rule, rule.id.clone()),
    ];
    for target in targets {
        keys.push(LockKey::new(LockKind::SignalEntity, target.clone()));
    }
    // External submissions serialize per payer portal.
    if rule.action_type != autopilot_core::ActionType::NotifyOnly {
        if let Some(payer) = event.payload.get("payer").and_then(|v| v.as_str()) {
            keys.push(LockKey::new(LockKind::ActionTarget, format!("portal:{payer}")));
        }
    }
    keys
}

/// Match one event against a tenant's rules (already in creation order).
pub fn evaluate_rules(rules: &[AutomationRule], event: &TriggerEvent) -> Vec<Action> {
    let mut actions = Vec::new();
    for rule in rules {
        if !rule.enabled || rule.trigger != event.kind {
            continue;
        }
        match rule.condition.eval(&event.payload) {
            Ok(true) => {
                let targets = target_entity_ids(event);
                let keys = lock_keys(rule, event, &targets);
                debug!(rule_id = %rule.id, identity = %event.identity, "rule matched");
                actions.push(Action {
                    rule_id: rule.id.clone(),
                    tenant_id: event.tenant_id.clone(),
                    action_type: rule.action_type,
                    params: rule.action_params.clone(),
                    event: event.clone(),
                    target_entity_ids: targets,
                    lock_keys: keys,
                    escalate_on_error: rule.escalate_on_error,
                });
            }
            Ok(false) => {}
            Err(err) => {
                // Configuration problem, not an execution failure: skip the
                // rule, keep the pass going.
                warn!(rule_id = %rule.id, tenant_id = %rule.tenant_id, %err, "rule skipped");
            }
        }
    }
    actions
}

/// Fetch the tenant's enabled rules and match the event against them.
pub async fn evaluate_event<S: EngineStorage>(
    storage: &S,
    event: &TriggerEvent,
) -> Result<Vec<Action>, StorageError> {
    let rules = storage.list_enabled_rules(&event.tenant_id).await?;
    Ok(evaluate_rules(&rules, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::{ActionType, CompareOp, Predicate, TriggerKind};
    use serde_json::json;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn event(payload: &[(&str, serde_json::Value)]) -> TriggerEvent {
        TriggerEvent {
            kind: TriggerKind::BehaviorShift,
            tenant_id: "t1".to_string(),
            identity: "behavior_shift:BCBS:2026-08-20".to_string(),
            payload: payload
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            occurred_at: datetime!(2026-08-20 00:00:00 UTC),
        }
    }

    fn rule(id: &str, condition: Predicate) -> AutomationRule {
        AutomationRule {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            name: id.to_string(),
            trigger: TriggerKind::BehaviorShift,
            condition,
            action_type: ActionType::HoldClaim,
            action_params: BTreeMap::new(),
            enabled: true,
            escalate_on_error: false,
            created_at: datetime!(2026-01-01 00:00:00 UTC),
        }
    }

    #[test]
    fn matching_rule_yields_action_with_locks() {
        let rules = vec![rule(
            "r1",
            Predicate::Compare {
                field: "current_rate".to_string(),
                op: CompareOp::Gte,
                value: json!(0.3),
            },
        )];
        let ev = event(&[("current_rate", json!(0.5)), ("payer", json!("BCBS"))]);

        let actions = evaluate_rules(&rules, &ev);
        assert_eq!(actions.len(), 1);
        let action = &actions[0];
        assert_eq!(action.target_entity_ids, vec!["payer:BCBS".to_string()]);
        assert!(action
            .lock_keys
            .contains(&LockKey::new(LockKind::Customer, "t1")));
        assert!(action
            .lock_keys
            .contains(&LockKey::new(LockKind::SignalEntity, "payer:BCBS")));
        assert!(action
            .lock_keys
            .contains(&LockKey::new(LockKind::ActionTarget, "portal:BCBS")));
    }

    #[test]
    fn unknown_field_skips_rule_without_matching() {
        let rules = vec![
            rule(
                "broken",
                Predicate::Compare {
                    field: "no_such_field".to_string(),
                    op: CompareOp::Gt,
                    value: json!(1),
                },
            ),
            rule(
                "healthy",
                Predicate::Compare {
                    field: "current_rate".to_string(),
                    op: CompareOp::Gt,
                    value: json!(0.1),
                },
            ),
        ];
        let ev = event(&[("current_rate", json!(0.5))]);

        let actions = evaluate_rules(&rules, &ev);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].rule_id, "healthy");
    }

    #[test]
    fn escalation_flag_is_captured_on_the_action() {
        let mut r = rule(
            "r1",
            Predicate::Compare {
                field: "current_rate".to_string(),
                op: CompareOp::Gt,
                value: json!(0.1),
            },
        );
        r.escalate_on_error = true;
        let ev = event(&[("current_rate", json!(0.5))]);
        let actions = evaluate_rules(&[r], &ev);
        assert!(actions[0].escalate_on_error);
    }

    #[test]
    fn trigger_kind_must_match() {
        let mut r = rule(
            "r1",
            Predicate::Compare {
                field: "days_until_expiration".to_string(),
                op: CompareOp::Lte,
                value: json!(30),
            },
        );
        r.trigger = TriggerKind::Calendar;
        let ev = event(&[("days_until_expiration", json!(10))]);
        assert!(evaluate_rules(&[r], &ev).is_empty());
    }

    #[test]
    fn authorization_target_preferred_over_payer() {
        let rules = vec![rule(
            "r1",
            Predicate::Compare {
                field: "days_until_expiration".to_string(),
                op: CompareOp::Lte,
                value: json!(30),
            },
        )];
        let mut ev = event(&[
            ("days_until_expiration", json!(10)),
            ("authorization_id", json!("auth-7")),
            ("payer", json!("BCBS")),
        ]);
        ev.kind = TriggerKind::BehaviorShift;
        let actions = evaluate_rules(&rules, &ev);
        assert_eq!(actions[0].target_entity_ids, vec!["auth-7".to_string()]);
    }
}
