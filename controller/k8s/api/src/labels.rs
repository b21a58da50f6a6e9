use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

pub const ORG_GUID: &str = "korifi.cloudfoundry.org/org-guid";
pub const SPACE_GUID: &str = "korifi.cloudfoundry.org/space-guid";
pub const APP_GUID: &str = "korifi.cloudfoundry.org/app-guid";
pub const APP_REVISION: &str = "korifi.cloudfoundry.org/app-rev";
pub const PROCESS_GUID: &str = "korifi.cloudfoundry.org/process-guid";
pub const PROCESS_TYPE: &str = "korifi.cloudfoundry.org/process-type";
pub const DEFAULT_DOMAIN: &str = "korifi.cloudfoundry.org/default-domain";
pub const SERVICE_INSTANCE_GUID: &str = "korifi.cloudfoundry.org/service-instance-guid";
pub const SERVICE_BINDING_GUID: &str = "korifi.cloudfoundry.org/service-binding-guid";
pub const PROVISIONED_SERVICE: &str = "servicebinding.io/provisioned-service";

pub const ORG_NAME_KEY: &str = "cloudfoundry.org/org-name";
pub const ORG_GUID_KEY: &str = "cloudfoundry.org/org-guid";
pub const SPACE_NAME_KEY: &str = "cloudfoundry.org/space-name";
pub const SPACE_GUID_KEY: &str = "cloudfoundry.org/space-guid";
pub const ORG_SPACE_DEPRECATED_NAME: &str = "ORG_SPACE_NAME_DEPRECATED";

pub const ROLE_GUID: &str = "cloudfoundry.org/role-guid";
pub const PROPAGATE_ROLE_BINDING: &str = "cloudfoundry.org/propagate-cf-role";
pub const PROPAGATED_FROM: &str = "cloudfoundry.org/propagated-from";

pub const APP_REVISION_DEFAULT: &str = "0";

static GUID_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r".*([a-fA-F0-9]{8}-[a-fA-F0-9]{4}-4[a-fA-F0-9]{3}-[8|9|aA|bB][a-fA-F0-9]{3}-[a-fA-F0-9]{12})$",
    )
    .expect("GUID suffix regex must compile")
});

/// Extracts the trailing v4 UUID from a resource name.
///
/// Names without a UUID suffix are returned unchanged.
pub fn guid_from_name(name: &str) -> String {
    GUID_SUFFIX.replace_all(name, "$1").into_owned()
}

/// Merges `extra` labels over a base set.
pub fn compile(base: &Map, extra: impl IntoIterator<Item = (String, String)>) -> Map {
    let mut labels = base.clone();
    labels.extend(extra);
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn extracts_uuid_suffix() {
        assert_eq!(
            guid_from_name("cf-org-2f35885d-0c9d-4423-83ad-fd05066f8576"),
            "2f35885d-0c9d-4423-83ad-fd05066f8576"
        );
        assert_eq!(
            guid_from_name("2f35885d-0c9d-4423-83ad-fd05066f8576"),
            "2f35885d-0c9d-4423-83ad-fd05066f8576"
        );
    }

    #[test]
    fn falls_back_to_full_name() {
        assert_eq!(guid_from_name("o1"), "o1");
        // Version 1 UUIDs do not match.
        assert_eq!(
            guid_from_name("cf-space-2f35885d-0c9d-1423-83ad-fd05066f8576"),
            "cf-space-2f35885d-0c9d-1423-83ad-fd05066f8576"
        );
    }

    #[test]
    fn compiled_labels_override_base() {
        let base = btreemap! {
            "pod-security.kubernetes.io/enforce".to_string() => "restricted".to_string(),
            ORG_NAME_KEY.to_string() => "base".to_string(),
        };
        let labels = compile(
            &base,
            [(ORG_NAME_KEY.to_string(), ORG_SPACE_DEPRECATED_NAME.to_string())],
        );
        assert_eq!(labels[ORG_NAME_KEY], ORG_SPACE_DEPRECATED_NAME);
        assert_eq!(labels["pod-security.kubernetes.io/enforce"], "restricted");
    }
}
