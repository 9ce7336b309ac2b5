use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition set on a tenancy object while contained resources prevent its
/// deletion.
pub const CONDITION_CONTENT_REMAINING: &str = "ContentRemaining";
pub const REASON_RESOURCES_REMAINING: &str = "SomeResourcesRemain";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    /// Advances only when `status` changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Condition-type specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// One entry of the `ContentRemaining` condition details, identifying a
/// resource that prevents deletion.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemainingContent {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Upserts `condition` by type. `lastTransitionTime` is advanced when the
/// condition is new or its status changed, and carried over otherwise.
pub fn set_or_update_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        None => {
            condition.last_transition_time = Some(Time(Utc::now()));
            conditions.push(condition);
        }
        Some(existing) => {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                Some(Time(Utc::now()))
            };
            *existing = condition;
        }
    }
}

pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_remaining(status: ConditionStatus, message: &str) -> Condition {
        Condition {
            type_: CONDITION_CONTENT_REMAINING.to_string(),
            status,
            last_transition_time: None,
            reason: Some(REASON_RESOURCES_REMAINING.to_string()),
            message: Some(message.to_string()),
            details: None,
        }
    }

    #[test]
    fn upsert_sets_transition_time_on_insert() {
        let mut conditions = Vec::new();
        set_or_update_condition(
            &mut conditions,
            content_remaining(ConditionStatus::True, "blocked"),
        );
        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].last_transition_time.is_some());
    }

    #[test]
    fn upsert_keeps_transition_time_while_status_unchanged() {
        let mut conditions = Vec::new();
        set_or_update_condition(
            &mut conditions,
            content_remaining(ConditionStatus::True, "blocked"),
        );
        let first = conditions[0].last_transition_time.clone();

        set_or_update_condition(
            &mut conditions,
            content_remaining(ConditionStatus::True, "still blocked"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first);
        assert_eq!(conditions[0].message.as_deref(), Some("still blocked"));
    }

    #[test]
    fn upsert_advances_transition_time_on_status_change() {
        let mut conditions = Vec::new();
        set_or_update_condition(
            &mut conditions,
            content_remaining(ConditionStatus::True, "blocked"),
        );
        // Pin the stored time into the past so a same-instant update is
        // still observable as a change.
        conditions[0].last_transition_time =
            Some(Time(Utc::now() - chrono::Duration::seconds(60)));
        let first = conditions[0].last_transition_time.clone();

        set_or_update_condition(
            &mut conditions,
            content_remaining(ConditionStatus::False, "drained"),
        );
        assert_eq!(conditions.len(), 1);
        assert_ne!(conditions[0].last_transition_time, first);
    }

    #[test]
    fn remove_is_by_type() {
        let mut conditions = Vec::new();
        set_or_update_condition(
            &mut conditions,
            content_remaining(ConditionStatus::True, "blocked"),
        );
        remove_condition(&mut conditions, "SomethingElse");
        assert_eq!(conditions.len(), 1);
        remove_condition(&mut conditions, CONDITION_CONTENT_REMAINING);
        assert!(conditions.is_empty());
    }
}
