pub mod channel;
pub mod command;
pub mod config;
pub mod error;
pub mod profile;
pub mod reassembler;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod transport;

pub use channel::Channel;
pub use command::{Command, CommandKind};
pub use config::{HttpConfig, LoopConfig, RuntimeConfig, SerialConfig, WirelessConfig};
pub use error::{CommandError, StoreError};
pub use profile::{FunctionProfile, PointsProfile, Profile, ProfileKind, ProfileMap};
pub use reassembler::FragmentReassembler;
pub use scheduler::{
    Clock, CommandInbox, HttpCommand, HttpReply, Scheduler, SystemClock, WirelessLink,
};
pub use state::{ControllerState, GrowLightColor};
pub use storage::{MemoryStore, Storage};
pub use transport::{ActuatorRecord, Response, SerialLink, TransportAdapter};
