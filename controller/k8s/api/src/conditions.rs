pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

pub const READY: &str = "Ready";
pub const BINDING_SECRET_AVAILABLE: &str = "BindingSecretAvailable";
pub const VCAP_SERVICES_SECRET_AVAILABLE: &str = "VCAPServicesSecretAvailable";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Implemented by resources whose status carries a list of conditions.
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn is_condition_true(&self, type_: &str) -> bool {
        is_true(self.conditions(), type_)
    }
}

/// A `True` or `False` condition stamped with the current time.
pub fn new(type_: impl ToString, status: bool, reason: impl ToString) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status { STATUS_TRUE } else { STATUS_FALSE }.to_string(),
        reason: reason.to_string(),
        message: String::new(),
        last_transition_time: Time(chrono::Utc::now()),
        observed_generation: None,
    }
}

pub fn unknown(type_: impl ToString) -> Condition {
    Condition {
        status: STATUS_UNKNOWN.to_string(),
        ..new(type_, false, STATUS_UNKNOWN)
    }
}

pub fn find<'c>(conditions: &'c [Condition], type_: &str) -> Option<&'c Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find(conditions, type_).is_some_and(|c| c.status == STATUS_TRUE)
}

/// Sets a condition, only moving its transition time when the status changes.
pub fn set(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.status = condition.status;
                existing.last_transition_time = condition.last_transition_time;
            }
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        None => conditions.push(condition),
    }
}

/// Adds an `Unknown` condition of the given type unless one is present.
pub fn set_unknown_if_absent(conditions: &mut Vec<Condition>, type_: &str) {
    if find(conditions, type_).is_none() {
        conditions.push(unknown(type_));
    }
}

/// Implements [`HasConditions`] for a custom resource whose status struct
/// holds a `conditions` field.
#[macro_export]
macro_rules! impl_has_conditions {
    ($kind:ty) => {
        impl $crate::conditions::HasConditions for $kind {
            fn conditions(&self) -> &[$crate::conditions::Condition] {
                self.status
                    .as_ref()
                    .map(|s| s.conditions.as_slice())
                    .unwrap_or_default()
            }

            fn conditions_mut(&mut self) -> &mut Vec<$crate::conditions::Condition> {
                &mut self.status.get_or_insert_with(Default::default).conditions
            }
        }
    };
}
