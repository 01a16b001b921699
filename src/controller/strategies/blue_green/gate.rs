use super::selector::service_hash;
use crate::crd::rollout::Rollout;
use k8s_openapi::api::core::v1::Service;

/// Whether promotion must wait for preview verification
///
/// Only withholds when a preview Service is configured and the active Service already
/// serves some version; the very first rollout is never held back. The flag itself is
/// set by the verification workflow, this only reads it.
pub fn must_withhold_promotion(rollout: &Rollout, active_service: Option<&Service>) -> bool {
    let preview_configured = rollout
        .spec
        .strategy
        .blue_green
        .as_ref()
        .is_some_and(|bg| !bg.preview_service.is_empty());
    if !preview_configured {
        return false;
    }

    if active_service.and_then(service_hash).is_none() {
        return false;
    }

    rollout
        .status
        .as_ref()
        .map(|status| status.verifying_preview.as_bool())
        .unwrap_or(false)
}
