// canio/src/lib.rs
//
// The main lib file for the Rust 'canio' library.
//
// This file is part of the Rust 'canio' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! A thread-safe SocketCAN bus driver for Linux.
//!
//! The Linux kernel exposes CAN controllers through a network-like API
//! (see <https://www.kernel.org/doc/Documentation/networking/can.txt>).
//! This crate wraps that API into a typed driver object that owns one
//! raw socket bound to one interface and can be shared freely between
//! threads: reads and writes are serialized by two independent locks, so
//! a send in progress never blocks a concurrent read.
//!
//! The usual workflow is:
//!
//! 1. Bring the interface up, e.g. with [`nl::set_interface_up`] or
//!    `ip link set can0 up type can bitrate 500000`.
//! 2. Construct a [`CanDriver`] for the interface, optionally with a set
//!    of kernel-side acceptance filters.
//! 3. Loop on [`CanDriver::wait_for_messages`] and drain the socket with
//!    [`CanDriver::read_queued_messages`], or read single frames with
//!    [`CanDriver::read_message`].
//! 4. Transmit with [`CanDriver::send_message`] or
//!    [`CanDriver::send_message_queue`].
//!
//! Received frames are [`CanMessage`] values. A message whose identifier
//! carries the error flag is an *error frame*: its payload bytes encode
//! which bus, controller, protocol or transceiver fault occurred, and the
//! message exposes typed views of them ([`CanMessage::controller_error`]
//! and friends, backed by the taxonomies in [`errors`]).
//!
//! ```no_run
//! use canio::{CanDriver, CanMessage, CAN_RAW};
//! use std::time::Duration;
//!
//! # fn main() -> canio::Result<()> {
//! let driver = CanDriver::new("can0", CAN_RAW)?;
//!
//! driver.send_message(&CanMessage::new(0x123u32, b"\x01\x02")?, false)?;
//!
//! while driver.wait_for_messages(Duration::from_millis(3000))? {
//!     for msg in driver.read_queued_messages()? {
//!         println!("{:X}", msg);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::{io, mem};

pub mod addr;
pub mod driver;
pub mod enumerate;
pub mod errors;
pub mod id;
pub mod message;

#[cfg(feature = "netlink")]
pub mod nl;

pub use crate::{
    addr::CanAddr,
    driver::{CanDriver, CanFdDriver, FilterMap, CAN_RAW, CAN_SOCK_SEVEN},
    enumerate::available_interfaces,
    errors::{
        ControllerError, ProtocolError, ProtocolLocation, ProtocolViolation, TransceiverError,
    },
    id::CanId,
    message::{CanFdMessage, CanMessage, CanXlMessage, FdFlags},
};

#[cfg(feature = "netlink")]
pub use crate::nl::CanInterface;

/// Errors surfaced by the driver and the message types.
///
/// Every failure that originates in a syscall carries the underlying
/// [`io::Error`], so the OS error code and `strerror` text reach the
/// operator (wrong interface name, interface down, permission denied, ...).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O operation was attempted on a driver whose socket is not open.
    #[error("invalid socket: the driver is not bound to an interface")]
    InvalidSocket,

    /// Opening, configuring or binding the socket failed.
    ///
    /// `action` names the initialisation step or configuration call that
    /// failed.
    #[error("failed to {action}: {source}")]
    Init {
        /// The step that failed.
        action: &'static str,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A read or write syscall failed during steady-state operation.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An outgoing payload exceeds the maximum for its frame kind.
    #[error("payload of {len} bytes exceeds the {max} byte frame maximum")]
    PayloadTooLarge {
        /// The rejected payload length.
        len: usize,
        /// The maximum the frame kind allows.
        max: usize,
    },

    /// Closing the socket failed, or it was already closed.
    #[error("failed to close socket: {0}")]
    Close(#[source] io::Error),

    /// A CAN identifier string was not valid hexadecimal.
    #[error("invalid CAN ID {0:?}: not a hexadecimal value")]
    InvalidIdFormat(String),
}

/// A result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// Gets a byte view of a sized type.
///
/// Kernel frame and address structs are read and written byte-for-byte;
/// this avoids sprinkling raw pointer casts through the I/O paths.
pub(crate) fn as_bytes<T: Sized>(val: &T) -> &[u8] {
    let sz = mem::size_of::<T>();
    unsafe { std::slice::from_raw_parts(val as *const _ as *const u8, sz) }
}

/// Gets a mutable byte view of a sized type.
pub(crate) fn as_bytes_mut<T: Sized>(val: &mut T) -> &mut [u8] {
    let sz = mem::size_of::<T>();
    unsafe { std::slice::from_raw_parts_mut(val as *mut _ as *mut u8, sz) }
}
