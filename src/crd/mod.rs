mod common;
mod metrics_trait;
mod oam;
mod verrazzano;

pub use common::*;
pub use metrics_trait::*;
pub use oam::*;
pub use verrazzano::*;
