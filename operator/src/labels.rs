use std::collections::BTreeMap;

/// Label naming the single load generator an object belongs to.
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "lg-operator";

/// Labels shared by the pod, service and ingress of one load generator.
///
/// The ownership label carries an empty value, so selecting on its key alone matches every
/// object this operator created.
pub fn generator_labels(ownership_label: &str, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from_iter([
        (ownership_label.to_owned(), String::new()),
        (INSTANCE_LABEL.to_owned(), name.to_owned()),
        (MANAGED_BY_LABEL.to_owned(), MANAGED_BY.to_owned()),
    ])
}

/// Create labels that select the pod of exactly one load generator.
pub fn instance_selector(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from_iter([(INSTANCE_LABEL.to_owned(), name.to_owned())])
}

/// Label selector matching every object carrying the ownership label.
pub fn ownership_selector(ownership_label: &str) -> String {
    ownership_label.to_owned()
}
