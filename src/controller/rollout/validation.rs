use crate::crd::rollout::Rollout;

/// Validate Rollout specification
///
/// Validates runtime constraints that cannot be enforced via CRD schema.
///
/// # Validation Rules
/// - `spec.replicas` must be >= 0
/// - `spec.revisionHistoryLimit` must be >= 0
/// - `spec.strategy.blueGreen` must be present
/// - `blueGreen.scaleDownDelaySeconds` must be >= 0
/// - At least one of `activeService` / `previewService` must be set
/// - `activeService` and `previewService` must differ
///
/// # Arguments
/// * `rollout` - The Rollout resource to validate
///
/// # Returns
/// * `Ok(())` - Validation passed
/// * `Err(String)` - Validation error message
pub fn validate_rollout(rollout: &Rollout) -> Result<(), String> {
    if rollout.spec.replicas < 0 {
        return Err(format!(
            "spec.replicas must be >= 0, got {}",
            rollout.spec.replicas
        ));
    }

    if let Some(limit) = rollout.spec.revision_history_limit {
        if limit < 0 {
            return Err(format!(
                "spec.revisionHistoryLimit must be >= 0, got {}",
                limit
            ));
        }
    }

    let Some(blue_green) = &rollout.spec.strategy.blue_green else {
        return Err("spec.strategy.blueGreen is required".to_string());
    };

    if let Some(delay) = blue_green.scale_down_delay_seconds {
        if delay < 0 {
            return Err(format!(
                "spec.strategy.blueGreen.scaleDownDelaySeconds must be >= 0, got {}",
                delay
            ));
        }
    }

    if blue_green.active_service.is_empty() && blue_green.preview_service.is_empty() {
        return Err(
            "spec.strategy.blueGreen needs activeService or previewService".to_string(),
        );
    }

    if blue_green.active_service == blue_green.preview_service {
        return Err(format!(
            "spec.strategy.blueGreen.activeService and previewService must differ, both are '{}'",
            blue_green.active_service
        ));
    }

    Ok(())
}
