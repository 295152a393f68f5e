//! VerticaAutoscaler status condition helpers
//!
//! Conditions are stored positionally: the slot of each condition type is
//! fixed by [`ConditionType::index`] and existing resources depend on it, so
//! the order of the enum must never change.

use crate::crd::AutoscalerCondition;
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
    /// targetSize has been seeded from the observed topology
    TargetSizeInitialized,
    /// The external scaler is reporting metrics and acting on them
    ScalingActive,
}

impl ConditionType {
    pub const ALL: [ConditionType; 2] = [
        ConditionType::TargetSizeInitialized,
        ConditionType::ScalingActive,
    ];

    pub fn index(self) -> usize {
        match self {
            ConditionType::TargetSizeInitialized => 0,
            ConditionType::ScalingActive => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::TargetSizeInitialized => "TargetSizeInitialized",
            ConditionType::ScalingActive => "ScalingActive",
        }
    }
}

/// Build a condition with the current timestamp.
pub fn build_condition(condition_type: ConditionType, status: &str) -> AutoscalerCondition {
    AutoscalerCondition {
        r#type: condition_type.as_str().to_string(),
        status: status.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
    }
}

/// Store `new` in the slot owned by `condition_type`.
///
/// Lower slots that do not exist yet are filled with `Unknown` entries of
/// their own type. The previous transition time is kept when the status
/// does not change.
pub fn set_condition(
    conditions: &mut Vec<AutoscalerCondition>,
    condition_type: ConditionType,
    new: AutoscalerCondition,
) {
    let idx = condition_type.index();
    while conditions.len() <= idx {
        let filler = ConditionType::ALL[conditions.len()];
        conditions.push(AutoscalerCondition {
            r#type: filler.as_str().to_string(),
            status: CONDITION_UNKNOWN.to_string(),
            last_transition_time: None,
        });
    }

    let existing = &mut conditions[idx];
    if existing.status == new.status && existing.last_transition_time.is_some() {
        existing.r#type = new.r#type;
    } else {
        *existing = new;
    }
}

pub fn is_condition_true(conditions: &[AutoscalerCondition], condition_type: ConditionType) -> bool {
    conditions
        .get(condition_type.index())
        .map(|c| c.status == CONDITION_TRUE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_condition() {
        let cond = build_condition(ConditionType::ScalingActive, CONDITION_TRUE);
        assert_eq!(cond.r#type, "ScalingActive");
        assert_eq!(cond.status, "True");
        assert!(cond.last_transition_time.is_some());
    }

    #[test]
    fn test_set_condition_fills_lower_slots() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            ConditionType::ScalingActive,
            build_condition(ConditionType::ScalingActive, CONDITION_TRUE),
        );
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].r#type, "TargetSizeInitialized");
        assert_eq!(conditions[0].status, CONDITION_UNKNOWN);
        assert_eq!(conditions[1].r#type, "ScalingActive");
        assert!(is_condition_true(&conditions, ConditionType::ScalingActive));
        assert!(!is_condition_true(&conditions, ConditionType::TargetSizeInitialized));
    }

    #[test]
    fn test_set_condition_preserves_transition_time_on_same_status() {
        let mut conditions = vec![AutoscalerCondition {
            r#type: "TargetSizeInitialized".to_string(),
            status: CONDITION_TRUE.to_string(),
            last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
        }];

        set_condition(
            &mut conditions,
            ConditionType::TargetSizeInitialized,
            build_condition(ConditionType::TargetSizeInitialized, CONDITION_TRUE),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_set_condition_updates_transition_time_on_status_change() {
        let mut conditions = vec![AutoscalerCondition {
            r#type: "TargetSizeInitialized".to_string(),
            status: CONDITION_FALSE.to_string(),
            last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
        }];

        set_condition(
            &mut conditions,
            ConditionType::TargetSizeInitialized,
            build_condition(ConditionType::TargetSizeInitialized, CONDITION_TRUE),
        );

        assert_eq!(conditions[0].status, CONDITION_TRUE);
        assert_ne!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_condition_lookup_is_positional() {
        // Lookup goes by slot, not by the stored type name.
        let conditions = vec![AutoscalerCondition {
            r#type: "ScalingActive".to_string(),
            status: CONDITION_TRUE.to_string(),
            last_transition_time: None,
        }];
        assert!(is_condition_true(&conditions, ConditionType::TargetSizeInitialized));
        assert!(!is_condition_true(&conditions, ConditionType::ScalingActive));
    }
}
