use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// API group shared by all tenancy resources.
pub const GROUP: &str = "core.tenancy.dev";
pub const VERSION: &str = "v1alpha1";

/// Records the username that created a tenancy object. Set once by the
/// mutating webhook, immutable afterwards.
pub const CREATED_BY_ANNOTATION: &str = "core.tenancy.dev/created-by";
pub const DISPLAY_NAME_ANNOTATION: &str = "core.tenancy.dev/display-name";

pub const PROJECT_LABEL: &str = "core.tenancy.dev/project";
pub const WORKSPACE_LABEL: &str = "core.tenancy.dev/workspace";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Finalizer guarding tenancy object deletion.
pub const DELETE_FINALIZER: &str = "core.tenancy.dev";

pub fn set_label(meta: &mut ObjectMeta, key: &str, value: &str) {
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}

pub fn set_annotation(meta: &mut ObjectMeta, key: &str, value: &str) {
    meta.annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_label_initializes_map() {
        let mut meta = ObjectMeta::default();
        set_label(&mut meta, PROJECT_LABEL, "demo");
        assert_eq!(
            meta.labels.unwrap().get(PROJECT_LABEL).map(String::as_str),
            Some("demo")
        );
    }
}
