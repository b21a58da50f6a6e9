use cf_control_plane_k8s_api::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A label/annotation patch. `None` values remove the key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MetadataPatch {
    #[serde(default)]
    pub labels: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Option<String>>,
}

// === impl MetadataPatch ===

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }

    pub fn apply(&self, meta: &mut ObjectMeta) {
        apply(&mut meta.labels, &self.labels);
        apply(&mut meta.annotations, &self.annotations);
    }
}

fn apply(
    target: &mut Option<BTreeMap<String, String>>,
    patch: &BTreeMap<String, Option<String>>,
) {
    if patch.is_empty() {
        return;
    }
    let map = target.get_or_insert_with(BTreeMap::new);
    for (key, value) in patch {
        match value {
            Some(value) => {
                map.insert(key.clone(), value.clone());
            }
            None => {
                map.remove(key);
            }
        }
    }
}
