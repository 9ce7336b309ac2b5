use k8s_openapi::api::rbac::v1::PolicyRule;
use std::{collections::BTreeSet, fmt};
use tenancy_controller_k8s_api as api;
use tenancy_controller_k8s_api::GroupVersionKind;

/// Where a deletion-blocking registration came from. Kept for precedence and
/// logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Builtin,
    Config,
    ServiceProvider(String),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Builtin => f.write_str("builtin"),
            Source::Config => f.write_str("config"),
            Source::ServiceProvider(name) => write!(f, "serviceProvider[{name}]"),
        }
    }
}

/// A kind whose living instances in a tenant namespace prevent that tenant
/// from being deleted. The plural resource name is captured at discovery
/// time so listers do not need to re-discover it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletionBlockingResource {
    pub gvk: GroupVersionKind,
    pub resource: String,
    pub source: Source,
}

/// One `{apiGroups, resources}` pairing of a permission rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceGrouping {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
}

/// An ordered list of resource groupings. Appending coalesces entries whose
/// apiGroup sets are equal, unioning their resources.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupedResources(Vec<ResourceGrouping>);

impl GroupedResources {
    pub fn new(groupings: Vec<ResourceGrouping>) -> Self {
        let mut list = Self::default();
        for grouping in groupings {
            list.append(grouping);
        }
        list
    }

    pub fn append(&mut self, elem: ResourceGrouping) {
        let groups: BTreeSet<&String> = elem.api_groups.iter().collect();
        if let Some(existing) = self
            .0
            .iter_mut()
            .find(|e| e.api_groups.iter().collect::<BTreeSet<_>>() == groups)
        {
            for resource in elem.resources {
                if !existing.resources.contains(&resource) {
                    existing.resources.push(resource);
                }
            }
        } else {
            self.0.push(elem);
        }
    }

    pub fn extend_from(&mut self, other: &GroupedResources) {
        for elem in &other.0 {
            self.append(elem.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceGrouping> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One rule per grouping with the given verbs.
    pub fn to_rules(&self, verbs: &[String]) -> Vec<PolicyRule> {
        self.0
            .iter()
            .map(|elem| PolicyRule {
                api_groups: Some(elem.api_groups.clone()),
                resources: Some(elem.resources.clone()),
                verbs: verbs.to_vec(),
                ..Default::default()
            })
            .collect()
    }
}

impl FromIterator<ResourceGrouping> for GroupedResources {
    fn from_iter<I: IntoIterator<Item = ResourceGrouping>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

pub fn builtin_blocking_project() -> Vec<DeletionBlockingResource> {
    vec![DeletionBlockingResource {
        gvk: GroupVersionKind::new(api::labels::GROUP, api::labels::VERSION, "Workspace"),
        resource: "workspaces".to_string(),
        source: Source::Builtin,
    }]
}

pub fn builtin_blocking_workspace() -> Vec<DeletionBlockingResource> {
    vec![DeletionBlockingResource {
        gvk: GroupVersionKind::new("mcp.tenancy.dev", "v2alpha1", "ManagedControlPlaneV2"),
        resource: "managedcontrolplanev2s".to_string(),
        source: Source::Builtin,
    }]
}

pub fn builtin_permissible_project() -> GroupedResources {
    GroupedResources(vec![ResourceGrouping {
        api_groups: vec![api::labels::GROUP.to_string()],
        resources: vec!["workspaces".to_string()],
    }])
}

pub fn builtin_permissible_workspace() -> GroupedResources {
    GroupedResources(vec![ResourceGrouping {
        api_groups: vec!["mcp.tenancy.dev".to_string()],
        resources: vec!["managedcontrolplanev2s".to_string()],
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouping(groups: &[&str], resources: &[&str]) -> ResourceGrouping {
        ResourceGrouping {
            api_groups: groups.iter().map(|s| s.to_string()).collect(),
            resources: resources.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn append_coalesces_equal_group_sets() {
        let mut list = GroupedResources::default();
        list.append(grouping(&[""], &["configmaps"]));
        list.append(grouping(&[""], &["secrets"]));
        list.append(grouping(&["apps"], &["deployments"]));

        let entries: Vec<_> = list.iter().cloned().collect();
        assert_eq!(
            entries,
            vec![
                grouping(&[""], &["configmaps", "secrets"]),
                grouping(&["apps"], &["deployments"]),
            ]
        );
    }

    #[test]
    fn append_dedupes_resources() {
        let mut list = GroupedResources::default();
        list.append(grouping(&[""], &["secrets"]));
        list.append(grouping(&[""], &["secrets", "configmaps"]));

        let entries: Vec<_> = list.iter().cloned().collect();
        assert_eq!(entries, vec![grouping(&[""], &["secrets", "configmaps"])]);
    }

    #[test]
    fn group_sets_compare_as_sets() {
        let mut list = GroupedResources::default();
        list.append(grouping(&["a", "b"], &["ones"]));
        list.append(grouping(&["b", "a"], &["twos"]));

        let entries: Vec<_> = list.iter().cloned().collect();
        assert_eq!(entries, vec![grouping(&["a", "b"], &["ones", "twos"])]);
    }

    #[test]
    fn source_renders_for_logging() {
        assert_eq!(Source::Builtin.to_string(), "builtin");
        assert_eq!(
            Source::ServiceProvider("dummy-1".into()).to_string(),
            "serviceProvider[dummy-1]"
        );
    }
}
