use bytemuck::NoUninit;
use derive_more::Display;

/// The state of a host, as viewed from the driver.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, NoUninit, Default)]
#[repr(u8)]
pub enum HostState {
    /// The driver has never tried to connect to the host, nor received any events about it.
    #[default]
    Unknown,
    /// The driver has been able to connect to the host or has received an event saying it is up.
    Up,
    /// The host has been convicted or reported down, and is not used for queries until it comes
    /// back up.
    Down,
}
