pub mod containerized_workload;
pub mod context;
pub mod error;
pub mod helm_overrides;
pub mod metrics_trait;
pub mod requeue;
pub mod status;
pub mod verrazzano;

pub use context::Context;
pub use error::{Error, Result};
pub use requeue::{new_requeue_with_delay, resync_requeue, short_requeue};
pub use status::{ConditionBuilder, FIELD_MANAGER};
