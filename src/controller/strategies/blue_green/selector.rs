use super::patch::with_resource_version;
use crate::crd::rollout::POD_TEMPLATE_HASH_LABEL;
use k8s_openapi::api::core::v1::Service;
use serde_json::{json, Value};

/// Fingerprint a Service currently routes to (empty or missing label = unbound)
pub fn service_hash(service: &Service) -> Option<&str> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .and_then(|selector| selector.get(POD_TEMPLATE_HASH_LABEL))
        .map(String::as_str)
        .filter(|hash| !hash.is_empty())
}

/// Decide whether a Service's selector must be repointed at `target`
///
/// # Arguments
/// * `service_name` - Configured name; empty means the role is not in use
/// * `service` - The Service as observed, `None` if it does not exist
/// * `target` - Fingerprint the Service should route to
///
/// # Returns
/// A merge patch that only touches the fingerprint key of `spec.selector`, or `None`
/// when there is nothing to do.
pub fn reconcile_selector(
    service_name: &str,
    service: Option<&Service>,
    target: &str,
) -> Option<Value> {
    if service_name.is_empty() {
        return None;
    }
    let service = service?;
    if service_hash(service) == Some(target) {
        return None;
    }

    let body = json!({
        "spec": {
            "selector": {
                POD_TEMPLATE_HASH_LABEL: target
            }
        }
    });
    Some(with_resource_version(&service.metadata, body))
}
