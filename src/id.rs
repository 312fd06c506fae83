// canio/src/id.rs
//
// Implements CANbus identifiers.
//
// This file is part of the Rust 'canio' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The bit-packed SocketCAN identifier word.
//!
//! The kernel multiplexes three things into one 32-bit `canid_t`:
//! an address (11 bits for standard frames, 29 bits for extended frames)
//! and three flag bits — extended format, remote transmission request and
//! error frame. [`CanId`] wraps that word verbatim and exposes the flags
//! and address as pure bit tests, so it is safe to use from any thread
//! without synchronization.
//!
//! When the error flag is set, the remaining bits do not address a node;
//! they encode *which error class* fired. Those classes are defined in
//! `linux/can/error.h` and surfaced here as the `has_*`/`is_*` error
//! predicates.

use crate::{Error, Result};
use bitflags::bitflags;
use embedded_can::{ExtendedId, Id, StandardId};
use std::{fmt, ops, str::FromStr};

pub use libc::{
    canid_t, CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_ERR_MASK, CAN_RTR_FLAG, CAN_SFF_MASK,
};

// Error class bits in the ID word of an error frame, from
// linux/can/error.h. These are not covered by the libc crate.

/// TX timeout (by netdevice driver)
pub const CAN_ERR_TX_TIMEOUT: canid_t = 0x0000_0001;
/// Lost arbitration; data[0] holds the bit position
pub const CAN_ERR_LOSTARB: canid_t = 0x0000_0002;
/// Controller problem; data[1] holds the error code
pub const CAN_ERR_CRTL: canid_t = 0x0000_0004;
/// Protocol violation; data[2..=3] hold type and location
pub const CAN_ERR_PROT: canid_t = 0x0000_0008;
/// Transceiver status; data[4] holds the error code
pub const CAN_ERR_TRX: canid_t = 0x0000_0010;
/// Received no ACK on transmission
pub const CAN_ERR_ACK: canid_t = 0x0000_0020;
/// Bus off
pub const CAN_ERR_BUSOFF: canid_t = 0x0000_0040;
/// Bus error (may flood!)
pub const CAN_ERR_BUSERROR: canid_t = 0x0000_0080;
/// Controller restarted
pub const CAN_ERR_RESTARTED: canid_t = 0x0000_0100;
/// TX/RX error counters in data[6..=7]
pub const CAN_ERR_CNT: canid_t = 0x0000_0200;

/// An error mask that will cause SocketCAN to report all errors
pub const ERR_MASK_ALL: u32 = CAN_ERR_MASK;

/// An error mask that will cause SocketCAN to silently drop all errors
pub const ERR_MASK_NONE: u32 = 0;

const ID_FLAG_BITS: canid_t = CAN_EFF_FLAG | CAN_RTR_FLAG | CAN_ERR_FLAG;

bitflags! {
    /// Bit flags in the composite SocketCAN ID word.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct IdFlags: canid_t {
        /// Indicates the frame uses a 29-bit extended ID
        const EFF = CAN_EFF_FLAG;
        /// Indicates a remote request frame.
        const RTR = CAN_RTR_FLAG;
        /// Indicates an error frame.
        const ERR = CAN_ERR_FLAG;
    }
}

/////////////////////////////////////////////////////////////////////////////

/// A CAN identifier, stored exactly as the kernel's 32-bit ID word.
///
/// The word packs the frame address together with the EFF/RTR/ERR flag
/// bits. `CanId` is an immutable value type: the bitwise and arithmetic
/// operators all yield new values, and every classification method is a
/// branch-free bit test on the raw word.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanId(canid_t);

impl CanId {
    /// Creates an identifier from a raw kernel ID word.
    pub const fn new(raw: canid_t) -> Self {
        Self(raw)
    }

    /// Gets the raw ID word, including any flag bits.
    pub const fn raw(self) -> canid_t {
        self.0
    }

    /// Gets the address portion of the word, with the flag bits stripped.
    pub const fn address(self) -> canid_t {
        self.0 & !ID_FLAG_BITS
    }

    /// Gets the flag bits set in the word.
    pub const fn flags(self) -> IdFlags {
        IdFlags::from_bits_truncate(self.0)
    }

    /// Whether the address portion is valid for the frame format.
    ///
    /// The stripped address must fit the 29-bit mask for extended-format
    /// identifiers and the 11-bit mask otherwise.
    pub const fn is_valid(self) -> bool {
        if self.is_extended_frame_id() {
            self.address() <= CAN_EFF_MASK
        } else {
            self.address() <= CAN_SFF_MASK
        }
    }

    /// Whether the error frame flag is set.
    ///
    /// An identifier with this flag set marks an error frame, not an
    /// addressable frame.
    pub const fn has_error_frame_flag(self) -> bool {
        self.0 & CAN_ERR_FLAG != 0
    }

    /// Whether the remote transmission request flag is set.
    pub const fn has_rtr_frame_flag(self) -> bool {
        self.0 & CAN_RTR_FLAG != 0
    }

    /// Whether this is a standard, 11-bit, frame identifier.
    pub const fn is_standard_frame_id(self) -> bool {
        self.0 & CAN_EFF_FLAG == 0
    }

    /// Whether this is an extended, 29-bit, frame identifier.
    pub const fn is_extended_frame_id(self) -> bool {
        self.0 & CAN_EFF_FLAG != 0
    }

    /// Gets the `embedded_can` representation of the address.
    pub fn hal_id(self) -> Id {
        if self.is_extended_frame_id() {
            ExtendedId::new(self.0 & CAN_EFF_MASK).unwrap().into()
        } else {
            StandardId::new((self.0 & CAN_SFF_MASK) as u16).unwrap().into()
        }
    }

    const fn error_class(self, mask: canid_t) -> bool {
        self.has_error_frame_flag() && self.0 & mask != 0
    }

    // The error class predicates below are only meaningful on an error
    // frame; each one requires the error flag in addition to its class bit.

    /// Whether this error frame reports a transmission timeout.
    pub const fn is_tx_timeout(self) -> bool {
        self.error_class(CAN_ERR_TX_TIMEOUT)
    }

    /// Whether this error frame reports lost arbitration.
    pub const fn has_lost_arbitration(self) -> bool {
        self.error_class(CAN_ERR_LOSTARB)
    }

    /// Whether this error frame reports a controller problem.
    pub const fn has_controller_problem(self) -> bool {
        self.error_class(CAN_ERR_CRTL)
    }

    /// Whether this error frame reports a protocol violation.
    pub const fn has_protocol_violation(self) -> bool {
        self.error_class(CAN_ERR_PROT)
    }

    /// Whether this error frame reports transceiver status information.
    pub const fn has_transceiver_status(self) -> bool {
        self.error_class(CAN_ERR_TRX)
    }

    /// Whether this error frame reports a missing ACK on transmission.
    pub const fn missing_ack_on_transmit(self) -> bool {
        self.error_class(CAN_ERR_ACK)
    }

    /// Whether this error frame reports the bus-off state.
    pub const fn has_bus_off_error(self) -> bool {
        self.error_class(CAN_ERR_BUSOFF)
    }

    /// Whether this error frame reports a bus error.
    pub const fn has_bus_error(self) -> bool {
        self.error_class(CAN_ERR_BUSERROR)
    }

    /// Whether this error frame reports a controller restart.
    pub const fn has_controller_restarted(self) -> bool {
        self.error_class(CAN_ERR_RESTARTED)
    }

    /// Whether this error frame carries the TX/RX error counters.
    pub const fn has_error_counter(self) -> bool {
        self.error_class(CAN_ERR_CNT)
    }
}

impl From<u32> for CanId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<i32> for CanId {
    fn from(raw: i32) -> Self {
        Self(raw as canid_t)
    }
}

impl From<Id> for CanId {
    /// Converts an `embedded_can` ID, setting the EFF flag on extended IDs.
    fn from(id: Id) -> Self {
        match id {
            Id::Standard(id) => Self(id.as_raw() as canid_t),
            Id::Extended(id) => Self(id.as_raw() | CAN_EFF_FLAG),
        }
    }
}

impl From<CanId> for canid_t {
    fn from(id: CanId) -> Self {
        id.raw()
    }
}

impl FromStr for CanId {
    type Err = Error;

    /// Parses a hexadecimal identifier string, with or without a `0x`
    /// prefix.
    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        canid_t::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| Error::InvalidIdFormat(s.into()))
    }
}

impl PartialEq<canid_t> for CanId {
    fn eq(&self, other: &canid_t) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::LowerHex for CanId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for CanId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

macro_rules! id_binary_ops {
    ($($trait:ident :: $method:ident => $op:tt),+ $(,)?) => {$(
        impl<T: Into<CanId>> ops::$trait<T> for CanId {
            type Output = CanId;

            fn $method(self, rhs: T) -> CanId {
                CanId(self.0 $op rhs.into().0)
            }
        }
    )+};
}

macro_rules! id_assign_ops {
    ($($trait:ident :: $method:ident => $op:tt),+ $(,)?) => {$(
        impl<T: Into<CanId>> ops::$trait<T> for CanId {
            fn $method(&mut self, rhs: T) {
                self.0 $op rhs.into().0;
            }
        }
    )+};
}

id_binary_ops! {
    Add::add => +,
    Sub::sub => -,
    Mul::mul => *,
    Div::div => /,
    Rem::rem => %,
    BitAnd::bitand => &,
    BitOr::bitor => |,
    BitXor::bitxor => ^,
    Shl::shl => <<,
    Shr::shr => >>,
}

id_assign_ops! {
    AddAssign::add_assign => +=,
    SubAssign::sub_assign => -=,
    MulAssign::mul_assign => *=,
    DivAssign::div_assign => /=,
    RemAssign::rem_assign => %=,
    BitAndAssign::bitand_assign => &=,
    BitOrAssign::bitor_assign => |=,
    BitXorAssign::bitxor_assign => ^=,
    ShlAssign::shl_assign => <<=,
    ShrAssign::shr_assign => >>=,
}

impl ops::Not for CanId {
    type Output = CanId;

    fn not(self) -> CanId {
        CanId(!self.0)
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_id() {
        let id = CanId::new(0x123);
        assert!(id.is_valid());
        assert!(id.is_standard_frame_id());
        assert!(!id.is_extended_frame_id());
        assert!(!id.has_error_frame_flag());
        assert!(!id.has_rtr_frame_flag());
    }

    #[test]
    fn test_extended_id() {
        let id = CanId::new(CAN_EFF_FLAG | 0x0012_3456);
        assert!(id.is_valid());
        assert!(id.is_extended_frame_id());
        assert!(!id.is_standard_frame_id());
        assert_eq!(id.address(), 0x0012_3456);
    }

    #[test]
    fn test_standard_id_overflowing_address() {
        // 29-bit address without the extended format flag
        let id = CanId::new(0x0012_3456);
        assert!(!id.is_valid());
    }

    #[test]
    fn test_error_frame_flag() {
        assert!(CanId::new(0xe000_0abc).has_error_frame_flag());
        assert!(!CanId::new(0x123).has_error_frame_flag());
    }

    #[test]
    fn test_rtr_flag() {
        assert!(CanId::new(0x4000_0000).has_rtr_frame_flag());
        assert!(!CanId::new(0x123).has_rtr_frame_flag());
    }

    #[test]
    fn test_raw_round_trip() {
        for raw in [0u32, 0x123, 0x4000_0000, 0xe000_0abc, 0xffff_ffff] {
            let id = CanId::new(raw);
            assert_eq!(id.raw(), raw);
            assert_eq!(id.is_valid(), CanId::new(id.raw()).is_valid());
        }
    }

    #[test]
    fn test_error_class_predicates() {
        let id = CanId::new(CAN_ERR_FLAG | CAN_ERR_CRTL);
        assert!(id.has_controller_problem());
        assert!(!id.has_lost_arbitration());
        assert!(!id.is_tx_timeout());

        let id = CanId::new(CAN_ERR_FLAG | CAN_ERR_TX_TIMEOUT);
        assert!(id.is_tx_timeout());

        // without the error flag, the class bits mean nothing
        let id = CanId::new(CAN_ERR_CRTL);
        assert!(!id.has_controller_problem());
    }

    #[test]
    fn test_arithmetic_ops() {
        let id = CanId::new(0x123);
        assert_eq!(id + 0x123u32, CanId::new(0x246));
        assert_eq!(id - 0x123u32, CanId::new(0));
        assert_eq!(id * 2u32, CanId::new(0x246));
        assert_eq!(CanId::new(0x246) / 2u32, CanId::new(0x123));
        assert_eq!(id % 2u32, CanId::new(1));

        let mut id = CanId::new(0x123);
        id += 0x123u32;
        assert_eq!(id, CanId::new(0x246));
    }

    #[test]
    fn test_bitwise_ops() {
        let id = CanId::new(0x123);
        assert_eq!(id | CAN_ERR_FLAG, CanId::new(CAN_ERR_FLAG | 0x123));
        assert_eq!(id & 0x0ffu32, CanId::new(0x023));
        assert_eq!(id ^ id, CanId::new(0));
        assert_eq!(id << 4u32, CanId::new(0x1230));
        assert_eq!(id >> 4u32, CanId::new(0x012));
        assert_eq!(!CanId::new(0), CanId::new(0xffff_ffff));
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!("0x123".parse::<CanId>().unwrap(), CanId::new(0x123));
        assert_eq!("123".parse::<CanId>().unwrap(), CanId::new(0x123));
        assert_eq!("0X7FF".parse::<CanId>().unwrap(), CanId::new(0x7ff));

        assert!(matches!(
            "hello_world".parse::<CanId>(),
            Err(Error::InvalidIdFormat(_))
        ));
    }

    #[test]
    fn test_hal_id_conversion() {
        let id = CanId::new(0x123);
        assert_eq!(id.hal_id(), Id::Standard(StandardId::new(0x123).unwrap()));

        let id = CanId::new(CAN_EFF_FLAG | 0x0012_3456);
        assert_eq!(
            id.hal_id(),
            Id::Extended(ExtendedId::new(0x0012_3456).unwrap())
        );

        let back = CanId::from(id.hal_id());
        assert_eq!(back, id);
    }
}
