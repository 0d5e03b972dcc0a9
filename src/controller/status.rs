//! Status and conditions management
//!
//! Conditions follow the OAM runtime conventions: a single `Synced`
//! condition on traits carrying `ReconcileSuccess` or `ReconcileError`, and
//! a `Ready` condition on the platform resource.

use std::fmt::Debug;

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::Result;
use crate::crd::Condition;

/// Field manager used for every write made by the operator
pub const FIELD_MANAGER: &str = "verrazzano-operator";

/// Standard condition types
pub mod condition_types {
    /// The resource has been reconciled against its dependents
    pub const SYNCED: &str = "Synced";
    /// The platform installation is ready
    pub const READY: &str = "Ready";
}

/// Condition reasons
pub mod condition_reasons {
    pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";
    pub const RECONCILE_ERROR: &str = "ReconcileError";
    pub const COMPONENTS_READY: &str = "ComponentsReady";
    pub const COMPONENTS_PENDING: &str = "ComponentsPending";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from the conditions already on the object
    pub fn from_existing(existing: Vec<Condition>) -> Self {
        Self {
            conditions: existing,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't.
    ///
    /// The transition time only moves when the status flips.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status || existing.last_transition_time.is_empty() {
                existing.last_transition_time = now;
            }
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            });
        }
        self
    }

    /// Record the outcome of a reconcile in the `Synced` condition
    pub fn synced(self, error: Option<&str>) -> Self {
        match error {
            None => self.set_condition(
                condition_types::SYNCED,
                condition_status::TRUE,
                condition_reasons::RECONCILE_SUCCESS,
                "",
            ),
            Some(message) => self.set_condition(
                condition_types::SYNCED,
                condition_status::FALSE,
                condition_reasons::RECONCILE_ERROR,
                message,
            ),
        }
    }

    /// Set the Ready condition
    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        let status = if is_ready {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::READY, status, reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge-patch the status subresource of `name`
pub async fn patch_status<K, S>(api: &Api<K>, name: &str, status: &S) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: Serialize,
{
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
