use crate::{
    condition::{self, Condition},
    subject::{self, Member, Role},
};
use k8s_openapi::api::authentication::v1::UserInfo;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A tenant of the onboarding platform. Reconciles into a namespace plus the
/// RBAC objects granting its members access.
#[derive(Clone, Debug, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "core.tenancy.dev",
    version = "v1alpha1",
    kind = "Project",
    status = "ProjectStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Project members.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Member>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    /// The namespace created for this project. Set exactly once.
    #[serde(default)]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Project {
    pub fn roles_for_user(&self, user: &UserInfo) -> BTreeSet<Role> {
        subject::roles_for_user(&self.spec.members, user)
    }

    pub fn user_has_role(&self, user: &UserInfo, role: Role) -> bool {
        self.roles_for_user(user).contains(&role)
    }

    pub fn set_or_update_condition(&mut self, c: Condition) {
        let status = self.status.get_or_insert_with(Default::default);
        condition::set_or_update_condition(&mut status.conditions, c);
    }

    pub fn remove_condition(&mut self, type_: &str) {
        if let Some(status) = self.status.as_mut() {
            condition::remove_condition(&mut status.conditions, type_);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Subject;

    fn project(members: Vec<Member>) -> Project {
        Project::new("demo", ProjectSpec { members })
    }

    #[test]
    fn user_has_role_checks_membership() {
        let p = project(vec![Member {
            subject: Subject::User {
                name: "alice".into(),
            },
            roles: vec![Role::Admin],
        }]);
        let alice = UserInfo {
            username: Some("alice".into()),
            ..Default::default()
        };
        let bob = UserInfo {
            username: Some("bob".into()),
            ..Default::default()
        };
        assert!(p.user_has_role(&alice, Role::Admin));
        assert!(!p.user_has_role(&alice, Role::View));
        assert!(!p.user_has_role(&bob, Role::Admin));
    }

    #[test]
    fn conditions_are_stored_on_status() {
        let mut p = project(vec![]);
        p.set_or_update_condition(Condition {
            type_: crate::condition::CONDITION_CONTENT_REMAINING.into(),
            status: crate::condition::ConditionStatus::True,
            last_transition_time: None,
            reason: None,
            message: None,
            details: None,
        });
        assert_eq!(p.status.as_ref().unwrap().conditions.len(), 1);
        p.remove_condition(crate::condition::CONDITION_CONTENT_REMAINING);
        assert!(p.status.as_ref().unwrap().conditions.is_empty());
    }
}
