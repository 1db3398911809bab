//! Decision engine: `(snapshot, event, rules) -> actions`.
//!
//! Pure and deterministic. Every matching rule contributes an action; when
//! two proposed actions conflict on one target, the higher-priority rule
//! wins (earlier declaration breaks ties) and the other is reported as
//! discarded.

use serde::Serialize;
use tracing::info;

use crate::action::Action;
use crate::event::ChangeEvent;
use crate::rules::{render, Rule, RuleSet};
use crate::snapshot::RepositorySnapshot;

/// An action dropped in favor of a conflicting, higher-priority one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discarded {
    pub action: Action,
    pub kept: Action,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Decision {
    /// Accepted actions in rule declaration order.
    pub actions: Vec<Action>,
    pub discarded: Vec<Discarded>,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

pub fn decide(snapshot: &RepositorySnapshot, event: &ChangeEvent, rules: &RuleSet) -> Decision {
    if event.kind.expects_live_subject() && !snapshot.knows(&event.subject) {
        info!(event = %event.id(), "subject no longer present, recording no-op");
        return Decision {
            actions: vec![Action::stale_subject(event.id())],
            discarded: Vec::new(),
        };
    }

    let mut proposed: Vec<(&Rule, Action)> = rules
        .rules()
        .iter()
        .filter(|rule| rule.matches(snapshot, event))
        .map(|rule| (rule, instantiate(rule, rules, snapshot, event)))
        .collect();

    // Resolve in priority order, then restore declaration order for output
    proposed.sort_by(|(a, _), (b, _)| {
        b.priority()
            .cmp(&a.priority())
            .then(a.order.cmp(&b.order))
    });

    let mut kept: Vec<(&Rule, Action)> = Vec::with_capacity(proposed.len());
    let mut discarded = Vec::new();
    for (rule, action) in proposed {
        match kept.iter().find(|(_, k)| k.conflicts_with(&action)) {
            Some((winner, k)) => {
                info!(
                    event = %event.id(),
                    discarded = %action,
                    discarded_rule = rule.id(),
                    kept = %k,
                    kept_rule = winner.id(),
                    "conflicting action discarded"
                );
                discarded.push(Discarded {
                    action,
                    kept: k.clone(),
                });
            }
            None => kept.push((rule, action)),
        }
    }
    kept.sort_by_key(|(rule, _)| rule.order);

    Decision {
        actions: kept.into_iter().map(|(_, a)| a).collect(),
        discarded,
    }
}

fn instantiate(
    rule: &Rule,
    rules: &RuleSet,
    snapshot: &RepositorySnapshot,
    event: &ChangeEvent,
) -> Action {
    let then = &rule.def.then;
    let target = render(then.target.as_deref().unwrap_or("{subject}"), snapshot, event);
    let mut params: std::collections::BTreeMap<String, String> = then
        .params
        .iter()
        .map(|(k, v)| (k.clone(), render(v, snapshot, event)))
        .collect();
    if let Some(text) = then.template.as_deref().and_then(|name| rules.template(name)) {
        params.insert("body".to_string(), render(text, snapshot, event));
    }
    Action::new(event.id(), then.kind, target, params).from_rule(rule.id())
}
