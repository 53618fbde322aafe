//! Datalink services that run on switches.

mod stp;
mod switching;

pub use stp::{path_cost, PortRole, PortSummary, StpService, PORT_PRIORITY};
pub use switching::{MacEntry, SwitchingService};
