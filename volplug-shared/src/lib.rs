//! volplug shared code
//!
//! Error, constant and protocol types used by the driver core, its storage
//! backends and the plugin protocol layer.

pub mod constants;
pub mod errors;
pub mod protocol;

pub use errors::{VolplugError, VolplugResult};
pub use protocol::{
    Capabilities, CreateRequest, MountRequest, Response, UnmountOutcome, UnmountRequest, Volume,
    VolumeStatus,
};
