//! Concrete device commands.
//!
//! Provides:
//! - Device identity: [`GetDeviceInfoCommand`], [`SaveDeviceNameCommand`], [`UpdateDeviceNameCommand`]
//! - Q-Symphony DSP queries: [`SymphonyStatusCommand`], [`SymphonyGroupCommand`],
//!   [`SymphonyVolumeAddCommand`], [`SurroundSpeakerRemapCommand`]
//! - File and interface readers: [`PreferenceDataCommand`], [`NetworkInterfaceCommand`]
//! - System: [`CoredumpMonitorCommand`], [`RebootCommand`], [`ShellCommand`]

pub mod device_info;
pub mod network;
pub mod preference;
pub mod symphony;
pub mod system;

pub use device_info::{GetDeviceInfoCommand, SaveDeviceNameCommand, UpdateDeviceNameCommand};
pub use network::{parse_ifconfig, NetworkInterfaceCommand, NetworkInterfaceInfo, DEFAULT_INTERFACE};
pub use preference::{PreferenceData, PreferenceDataCommand};
pub use symphony::{
    SurroundSpeakerRemapCommand, SymphonyGroupCommand, SymphonyStatus, SymphonyStatusCommand,
    SymphonyVolumeAddCommand,
};
pub use system::{CoreDumpListing, CoredumpMonitorCommand, RebootCommand, ShellCommand};
