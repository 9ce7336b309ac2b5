use k8s_openapi::api::{authentication::v1::UserInfo, rbac::v1 as rbacv1};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

/// A user identity a membership or override applies to. `namespace` is only
/// present for service accounts, which the tagged representation enforces.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "kind")]
pub enum Subject {
    User { name: String },
    Group { name: String },
    ServiceAccount { namespace: String, name: String },
}

impl Subject {
    /// The username the API server reports for this subject. Groups have no
    /// canonical username.
    pub fn canonical_username(&self) -> Option<String> {
        match self {
            Subject::User { name } => Some(name.clone()),
            Subject::ServiceAccount { namespace, name } => {
                Some(format!("system:serviceaccount:{namespace}:{name}"))
            }
            Subject::Group { .. } => None,
        }
    }

    /// Whether this subject denotes the given requester, either by canonical
    /// username or by group membership. Matching is string equality only.
    pub fn matches_user(&self, user: &UserInfo) -> bool {
        match self {
            Subject::Group { name } => user
                .groups
                .iter()
                .flatten()
                .any(|group| group == name),
            _ => {
                self.canonical_username().as_deref() == user.username.as_deref()
                    && user.username.is_some()
            }
        }
    }

    pub fn to_rbac(&self) -> rbacv1::Subject {
        match self {
            Subject::User { name } => rbacv1::Subject {
                kind: "User".to_string(),
                name: name.clone(),
                api_group: Some("rbac.authorization.k8s.io".to_string()),
                namespace: None,
            },
            Subject::Group { name } => rbacv1::Subject {
                kind: "Group".to_string(),
                name: name.clone(),
                api_group: Some("rbac.authorization.k8s.io".to_string()),
                namespace: None,
            },
            Subject::ServiceAccount { namespace, name } => rbacv1::Subject {
                kind: "ServiceAccount".to_string(),
                name: name.clone(),
                api_group: None,
                namespace: Some(namespace.clone()),
            },
        }
    }
}

/// Roles a member can hold on a tenancy object.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    View,
}

pub const ALL_ROLES: [Role; 2] = [Role::Admin, Role::View];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::View => "view",
        }
    }

    /// Verbs granted on permissible resources for this role.
    pub fn verbs(&self) -> Vec<String> {
        match self {
            Role::Admin => vec!["*".to_string()],
            Role::View => vec![
                "get".to_string(),
                "list".to_string(),
                "watch".to_string(),
            ],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role '{0}', expected 'admin' or 'view'")]
pub struct RoleParseError(String);

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "view" => Ok(Role::View),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

/// The two tenancy kinds. Also used as the `<type>` segment in RBAC object
/// names and as the `kind` of an override resource reference.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TenancyKind {
    Project,
    Workspace,
}

impl TenancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenancyKind::Project => "project",
            TenancyKind::Workspace => "workspace",
        }
    }
}

impl fmt::Display for TenancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of a tenancy object.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Member {
    #[serde(flatten)]
    pub subject: Subject,

    /// Roles this member holds.
    pub roles: Vec<Role>,
}

impl Member {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Unions the role sets of every member matching the requester, by canonical
/// username or group name.
pub fn roles_for_user(members: &[Member], user: &UserInfo) -> BTreeSet<Role> {
    members
        .iter()
        .filter(|member| member.subject.matches_user(user))
        .flat_map(|member| member.roles.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, groups: &[&str]) -> UserInfo {
        UserInfo {
            username: Some(name.to_string()),
            groups: Some(groups.iter().map(|g| g.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn canonical_usernames() {
        assert_eq!(
            Subject::User {
                name: "alice".into()
            }
            .canonical_username()
            .as_deref(),
            Some("alice")
        );
        assert_eq!(
            Subject::ServiceAccount {
                namespace: "kube-system".into(),
                name: "robot".into()
            }
            .canonical_username()
            .as_deref(),
            Some("system:serviceaccount:kube-system:robot")
        );
        assert_eq!(
            Subject::Group {
                name: "admins".into()
            }
            .canonical_username(),
            None
        );
    }

    #[test]
    fn roles_union_over_username_and_groups() {
        let members = vec![
            Member {
                subject: Subject::User {
                    name: "alice".into(),
                },
                roles: vec![Role::View],
            },
            Member {
                subject: Subject::Group {
                    name: "platform-admins".into(),
                },
                roles: vec![Role::Admin],
            },
            Member {
                subject: Subject::User { name: "bob".into() },
                roles: vec![Role::Admin],
            },
        ];

        let roles = roles_for_user(&members, &user("alice", &["platform-admins"]));
        assert_eq!(
            roles.into_iter().collect::<Vec<_>>(),
            vec![Role::Admin, Role::View]
        );

        let roles = roles_for_user(&members, &user("alice", &[]));
        assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec![Role::View]);

        assert!(roles_for_user(&members, &user("mallory", &["guests"])).is_empty());
    }

    #[test]
    fn service_account_matches_by_canonical_username() {
        let members = vec![Member {
            subject: Subject::ServiceAccount {
                namespace: "ns-1".into(),
                name: "robot".into(),
            },
            roles: vec![Role::Admin],
        }];

        let roles = roles_for_user(&members, &user("system:serviceaccount:ns-1:robot", &[]));
        assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec![Role::Admin]);
    }

    #[test]
    fn group_name_never_matches_username() {
        let members = vec![Member {
            subject: Subject::Group {
                name: "alice".into(),
            },
            roles: vec![Role::Admin],
        }];
        assert!(roles_for_user(&members, &user("alice", &[])).is_empty());
    }

    #[test]
    fn member_wire_format_is_flat() {
        let member = Member {
            subject: Subject::ServiceAccount {
                namespace: "ns-1".into(),
                name: "robot".into(),
            },
            roles: vec![Role::Admin, Role::View],
        };
        let value = serde_json::to_value(&member).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "kind": "ServiceAccount",
                "namespace": "ns-1",
                "name": "robot",
                "roles": ["admin", "view"],
            })
        );
    }

    #[test]
    fn unknown_role_fails_to_parse() {
        assert!("owner".parse::<Role>().is_err());
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
    }
}
