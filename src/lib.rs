pub mod config;
pub mod datalink;
pub mod device;
pub mod error;
pub mod events;
pub mod handler;
pub mod message;
pub mod network;
pub mod shell;
pub mod simulator;
pub mod topology;

pub use config::SimulationConfig;
pub use device::{DeviceType, InterfaceId, LinkId, NodeId, PortRef};
pub use error::{ConfigError, ShellError, SimError, TopologyError};
pub use events::{EngineEvent, EngineEventKind};
pub use shell::Shell;
pub use simulator::{Duration, RealtimeDriver, SharedSimulation, Simulation, SpeedMode, VirtualTime};
pub use topology::TopologyDescription;
