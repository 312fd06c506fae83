// canio/src/message.rs
//
// Implements messages for classic CAN 2.0, CAN FD and CAN XL frames.
//
// This file is part of the Rust 'canio' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! CAN bus messages.
//!
//! At the lowest level, [libc](https://crates.io/crates/libc) defines the
//! CAN frames as structs that are binary compatible with the C data types
//! sent to and from the kernel:
//! - [can_frame](https://docs.rs/libc/latest/libc/struct.can_frame.html)
//!   The classic CAN 2.0 frame with up to 8 bytes of data.
//! - [canfd_frame](https://docs.rs/libc/latest/libc/struct.canfd_frame.html)
//!   The CAN Flexible Data Rate frame with up to 64 bytes of data.
//!
//! The CAN XL frame (up to 2048 bytes of data, plus priority and
//! acceptance fields) is not covered by libc yet; its layout is declared
//! here as [`canxl_frame`].
//!
//! Each message type wraps the kernel struct verbatim, so a received
//! message can be retransmitted without re-encoding. Messages are
//! immutable values; equality compares identifier and payload bytes and
//! ignores the receive timestamp.
//!
//! A [`CanMessage`] whose identifier has the error flag set is an error
//! frame. Its payload bytes carry auxiliary error data at offsets fixed
//! by the kernel convention, exposed through the `*_error` and
//! `*_counter` accessors. These accessors are a zero-validation view:
//! they decode whatever bytes are present (missing bytes read as zero)
//! and their output is only meaningful when
//! [`is_error_frame`](CanMessage::is_error_frame) returns `true`.

use crate::{
    errors::{ControllerError, ProtocolError, TransceiverError},
    id::CanId,
    Error, Result,
};
use bitflags::bitflags;
use embedded_can::{Frame as EmbeddedFrame, Id};
use itertools::Itertools;
use libc::{can_frame, canfd_frame, canid_t};
use std::{fmt, mem, time::Duration};

pub use libc::{CANFD_BRS, CANFD_ESI, CANFD_MAX_DLEN, CAN_MAX_DLEN, CAN_RTR_FLAG};

/// The maximum payload of a CAN XL frame, from `linux/can.h`.
pub const CANXL_MAX_DLEN: usize = 2048;

/// Mandatory CAN XL frame flag (`linux/can.h`).
pub const CANXL_XLF: u8 = 0x80;

bitflags! {
    /// Bit flags of a Flexible Data (FD) frame.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct FdFlags: u8 {
        /// Bit rate switch (second bit rate for payload data)
        const BRS = CANFD_BRS as u8;
        /// Error state indicator of the transmitting node
        const ESI = CANFD_ESI as u8;
    }
}

/// Creates a default C `can_frame`.
/// This initializes the entire structure to zeros.
#[inline(always)]
pub fn can_frame_default() -> can_frame {
    unsafe { mem::zeroed() }
}

/// Creates a default C `canfd_frame`.
/// This initializes the entire structure to zeros.
#[inline(always)]
pub fn canfd_frame_default() -> canfd_frame {
    unsafe { mem::zeroed() }
}

/// Creates a default C `canxl_frame`.
/// This initializes the entire structure to zeros.
#[inline(always)]
pub fn canxl_frame_default() -> canxl_frame {
    unsafe { mem::zeroed() }
}

/// The kernel CAN XL frame, from `linux/can.h`.
///
/// Declared here since the libc crate does not ship it yet. The field
/// order and sizes are kernel ABI and must not change.
#[repr(C, align(8))]
#[derive(Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct canxl_frame {
    /// 11-bit arbitration priority, upper bits zero
    pub prio: canid_t,
    /// Additional CAN XL flags, `CANXL_XLF` must be set
    pub flags: u8,
    /// SDU (service data unit) type
    pub sdt: u8,
    /// Frame payload length in bytes
    pub len: u16,
    /// Acceptance field
    pub af: u32,
    /// Payload buffer
    pub data: [u8; CANXL_MAX_DLEN],
}

// ===== CanMessage =====

/// A classic CAN 2.0 message with up to 8 bytes of data.
///
/// Wraps the kernel `can_frame` verbatim, together with an optional
/// receive-timestamp offset that is populated by the driver when
/// telemetry collection is enabled.
#[derive(Clone, Copy)]
pub struct CanMessage {
    frame: can_frame,
    timestamp_offset: Option<Duration>,
}

impl CanMessage {
    /// Creates a message from an identifier and a payload.
    ///
    /// Fails with [`Error::PayloadTooLarge`] if the payload exceeds the
    /// classic CAN maximum of 8 bytes.
    pub fn new(id: impl Into<CanId>, data: &[u8]) -> Result<Self> {
        if data.len() > CAN_MAX_DLEN {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: CAN_MAX_DLEN,
            });
        }
        let mut frame = can_frame_default();
        frame.can_id = id.into().raw();
        frame.can_dlc = data.len() as u8;
        frame.data[..data.len()].copy_from_slice(data);
        Ok(Self {
            frame,
            timestamp_offset: None,
        })
    }

    /// Creates a message from a raw kernel frame.
    ///
    /// Identifier and payload bytes are taken verbatim; nothing is
    /// validated beyond what the kernel already guarantees.
    pub fn from_frame(frame: can_frame) -> Self {
        Self {
            frame,
            timestamp_offset: None,
        }
    }

    /// Creates a message from a raw kernel frame with a receive timestamp
    /// offset.
    pub fn from_frame_stamped(frame: can_frame, offset: Duration) -> Self {
        Self {
            frame,
            timestamp_offset: Some(offset),
        }
    }

    /// The identifier word of this message.
    pub fn id(&self) -> CanId {
        CanId::new(self.frame.can_id)
    }

    /// The payload bytes of this message.
    pub fn data(&self) -> &[u8] {
        &self.frame.data[..usize::from(self.frame.can_dlc).min(CAN_MAX_DLEN)]
    }

    /// The raw kernel frame, suitable for zero-copy retransmission.
    pub fn raw_frame(&self) -> &can_frame {
        &self.frame
    }

    /// The receive timestamp offset, if telemetry collection was enabled
    /// when this message was read.
    pub fn timestamp_offset(&self) -> Option<Duration> {
        self.timestamp_offset
    }

    /// Whether the identifier address is valid for its frame format.
    pub fn is_valid(&self) -> bool {
        self.id().is_valid()
    }

    /// Whether this message is an error frame.
    pub fn is_error_frame(&self) -> bool {
        self.id().has_error_frame_flag()
    }

    /// Whether this message is a remote transmission request.
    pub fn is_remote_transmission_request(&self) -> bool {
        self.id().has_rtr_frame_flag()
    }

    /// Whether this message carries a standard, 11-bit, identifier.
    pub fn is_standard_frame_id(&self) -> bool {
        self.id().is_standard_frame_id()
    }

    /// Whether this message carries an extended, 29-bit, identifier.
    pub fn is_extended_frame_id(&self) -> bool {
        self.id().is_extended_frame_id()
    }

    // ===== Error frame view =====
    //
    // Byte offsets fixed by the kernel error frame convention:
    //   data[0]    arbitration lost bit position
    //   data[1]    controller error code
    //   data[2..3] protocol violation code + location
    //   data[4]    transceiver error code
    //   data[6]    TX error counter
    //   data[7]    RX error counter

    fn data_byte(&self, idx: usize) -> u8 {
        self.data().get(idx).copied().unwrap_or(0)
    }

    /// Whether this error frame reports a controller problem.
    pub fn has_controller_problem(&self) -> bool {
        self.id().has_controller_problem()
    }

    /// Whether this error frame reports lost arbitration.
    pub fn has_lost_arbitration(&self) -> bool {
        self.id().has_lost_arbitration()
    }

    /// Whether this error frame reports a protocol violation.
    pub fn has_protocol_violation(&self) -> bool {
        self.id().has_protocol_violation()
    }

    /// Whether this error frame reports transceiver status information.
    pub fn has_transceiver_status(&self) -> bool {
        self.id().has_transceiver_status()
    }

    /// Whether this error frame reports a missing ACK on transmission.
    pub fn missing_ack_on_transmit(&self) -> bool {
        self.id().missing_ack_on_transmit()
    }

    /// Whether this error frame reports the bus-off state.
    pub fn has_bus_off_error(&self) -> bool {
        self.id().has_bus_off_error()
    }

    /// Whether this error frame reports a bus error.
    pub fn has_bus_error(&self) -> bool {
        self.id().has_bus_error()
    }

    /// Whether this error frame reports a transmission timeout.
    pub fn is_tx_timeout(&self) -> bool {
        self.id().is_tx_timeout()
    }

    /// Whether this error frame carries the TX/RX error counters.
    pub fn has_error_counter(&self) -> bool {
        self.id().has_error_counter()
    }

    /// The bit position in which arbitration was lost, from `data[0]`.
    pub fn arbitration_lost_bit(&self) -> u8 {
        self.data_byte(0)
    }

    /// The controller error decoded from `data[1]`.
    pub fn controller_error(&self) -> ControllerError {
        ControllerError::from_byte(self.data_byte(1))
    }

    /// The protocol violation decoded from `data[2]` and `data[3]`.
    pub fn protocol_error(&self) -> ProtocolError {
        ProtocolError::from_bytes(self.data_byte(2), self.data_byte(3))
    }

    /// The transceiver error decoded from `data[4]`.
    pub fn transceiver_error(&self) -> TransceiverError {
        TransceiverError::from_byte(self.data_byte(4))
    }

    /// The transmit error counter, from `data[6]`.
    pub fn tx_error_counter(&self) -> u8 {
        self.data_byte(6)
    }

    /// The receive error counter, from `data[7]`.
    pub fn rx_error_counter(&self) -> u8 {
        self.data_byte(7)
    }
}

impl PartialEq for CanMessage {
    /// Equality is identifier and payload bytes; the receive timestamp is
    /// not part of the message identity.
    fn eq(&self, other: &Self) -> bool {
        self.frame.can_id == other.frame.can_id && self.data() == other.data()
    }
}

impl Eq for CanMessage {}

impl From<can_frame> for CanMessage {
    fn from(frame: can_frame) -> Self {
        Self::from_frame(frame)
    }
}

impl fmt::Debug for CanMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanMessage {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(f, " }}")
    }
}

impl fmt::UpperHex for CanMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}#", self.frame.can_id)?;
        let mut parts = self.data().iter().map(|v| format!("{:02X}", v));
        write!(f, "{}", parts.join(" "))
    }
}

impl EmbeddedFrame for CanMessage {
    /// Creates a new data frame; `None` if the payload is too large.
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let id: Id = id.into();
        CanMessage::new(CanId::from(id), data).ok()
    }

    /// Creates a new remote transmission request frame.
    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > CAN_MAX_DLEN {
            return None;
        }
        let id: Id = id.into();
        let mut frame = can_frame_default();
        frame.can_id = CanId::from(id).raw() | CAN_RTR_FLAG;
        frame.can_dlc = dlc as u8;
        Some(CanMessage::from_frame(frame))
    }

    fn is_extended(&self) -> bool {
        self.is_extended_frame_id()
    }

    fn is_remote_frame(&self) -> bool {
        self.is_remote_transmission_request()
    }

    fn id(&self) -> Id {
        CanMessage::id(self).hal_id()
    }

    fn dlc(&self) -> usize {
        usize::from(self.frame.can_dlc)
    }

    fn data(&self) -> &[u8] {
        CanMessage::data(self)
    }
}

// ===== CanFdMessage =====

/// A CAN Flexible Data Rate message with up to 64 bytes of data.
#[derive(Clone, Copy)]
pub struct CanFdMessage {
    frame: canfd_frame,
    timestamp_offset: Option<Duration>,
}

impl CanFdMessage {
    /// Creates an FD message from an identifier and a payload.
    ///
    /// Fails with [`Error::PayloadTooLarge`] if the payload exceeds the
    /// CAN FD maximum of 64 bytes.
    pub fn new(id: impl Into<CanId>, data: &[u8]) -> Result<Self> {
        Self::with_flags(id, data, FdFlags::empty())
    }

    /// Creates an FD message with explicit FD flags (BRS/ESI).
    pub fn with_flags(id: impl Into<CanId>, data: &[u8], flags: FdFlags) -> Result<Self> {
        if data.len() > CANFD_MAX_DLEN {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: CANFD_MAX_DLEN,
            });
        }
        let mut frame = canfd_frame_default();
        frame.can_id = id.into().raw();
        frame.len = data.len() as u8;
        frame.flags = flags.bits();
        frame.data[..data.len()].copy_from_slice(data);
        Ok(Self {
            frame,
            timestamp_offset: None,
        })
    }

    /// Creates an FD message from a raw kernel frame, verbatim.
    pub fn from_frame(frame: canfd_frame) -> Self {
        Self {
            frame,
            timestamp_offset: None,
        }
    }

    /// Creates an FD message from a raw kernel frame with a receive
    /// timestamp offset.
    pub fn from_frame_stamped(frame: canfd_frame, offset: Duration) -> Self {
        Self {
            frame,
            timestamp_offset: Some(offset),
        }
    }

    /// The identifier word of this message.
    pub fn id(&self) -> CanId {
        CanId::new(self.frame.can_id)
    }

    /// The payload bytes of this message.
    pub fn data(&self) -> &[u8] {
        &self.frame.data[..usize::from(self.frame.len).min(CANFD_MAX_DLEN)]
    }

    /// The FD flags of this message.
    pub fn fd_flags(&self) -> FdFlags {
        FdFlags::from_bits_truncate(self.frame.flags)
    }

    /// Whether the bit rate switch flag is set.
    pub fn is_bit_rate_switched(&self) -> bool {
        self.fd_flags().contains(FdFlags::BRS)
    }

    /// Whether the transmitting node signalled its error state.
    pub fn is_error_state_indicated(&self) -> bool {
        self.fd_flags().contains(FdFlags::ESI)
    }

    /// The raw kernel frame, suitable for zero-copy retransmission.
    pub fn raw_frame(&self) -> &canfd_frame {
        &self.frame
    }

    /// The receive timestamp offset, if telemetry collection was enabled
    /// when this message was read.
    pub fn timestamp_offset(&self) -> Option<Duration> {
        self.timestamp_offset
    }

    /// Whether this message is an error frame.
    pub fn is_error_frame(&self) -> bool {
        self.id().has_error_frame_flag()
    }

    /// Whether this message carries an extended, 29-bit, identifier.
    pub fn is_extended_frame_id(&self) -> bool {
        self.id().is_extended_frame_id()
    }
}

impl PartialEq for CanFdMessage {
    fn eq(&self, other: &Self) -> bool {
        self.frame.can_id == other.frame.can_id && self.data() == other.data()
    }
}

impl Eq for CanFdMessage {}

impl From<canfd_frame> for CanFdMessage {
    fn from(frame: canfd_frame) -> Self {
        Self::from_frame(frame)
    }
}

impl From<CanMessage> for CanFdMessage {
    /// Promotes a classic message to an FD message with no FD flags set.
    fn from(msg: CanMessage) -> Self {
        let mut frame = canfd_frame_default();
        frame.can_id = msg.raw_frame().can_id;
        frame.len = msg.raw_frame().can_dlc;
        frame.data[..msg.data().len()].copy_from_slice(msg.data());
        Self {
            frame,
            timestamp_offset: msg.timestamp_offset(),
        }
    }
}

impl TryFrom<CanFdMessage> for CanMessage {
    type Error = Error;

    /// Converts an FD message back to a classic message.
    ///
    /// Fails with [`Error::PayloadTooLarge`] if the payload does not fit
    /// into the classic 8 data bytes.
    fn try_from(msg: CanFdMessage) -> Result<Self> {
        let mut classic = CanMessage::new(msg.id(), msg.data())?;
        classic.timestamp_offset = msg.timestamp_offset();
        Ok(classic)
    }
}

impl fmt::Debug for CanFdMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CanFdMessage {{ ")?;
        fmt::UpperHex::fmt(self, f)?;
        write!(f, " }}")
    }
}

impl fmt::UpperHex for CanFdMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}##{:X}", self.frame.can_id, self.frame.flags)?;
        let mut parts = self.data().iter().map(|v| format!("{:02X}", v));
        write!(f, " {}", parts.join(" "))
    }
}

// ===== CanXlMessage =====

/// A CAN XL message with up to 2048 bytes of data.
///
/// CAN XL replaces the arbitration identifier with an 11-bit priority
/// and a separate 32-bit acceptance field. The mandatory XL format flag
/// is set on construction; the SDU type is left at zero.
#[derive(Clone, Copy)]
pub struct CanXlMessage {
    frame: canxl_frame,
}

impl CanXlMessage {
    /// Creates an XL message from priority, acceptance field and payload.
    ///
    /// Fails with [`Error::PayloadTooLarge`] if the payload exceeds the
    /// CAN XL maximum of 2048 bytes.
    pub fn new(priority: u16, acceptance: u32, data: &[u8]) -> Result<Self> {
        if data.len() > CANXL_MAX_DLEN {
            return Err(Error::PayloadTooLarge {
                len: data.len(),
                max: CANXL_MAX_DLEN,
            });
        }
        let mut frame = canxl_frame_default();
        // the XL priority shares the classic standard-frame width
        frame.prio = canid_t::from(priority) & libc::CAN_SFF_MASK;
        frame.af = acceptance;
        frame.len = data.len() as u16;
        frame.flags = CANXL_XLF;
        frame.data[..data.len()].copy_from_slice(data);
        Ok(Self { frame })
    }

    /// Creates an XL message from a raw kernel frame, verbatim.
    pub fn from_frame(frame: canxl_frame) -> Self {
        Self { frame }
    }

    /// The 11-bit arbitration priority.
    pub fn priority(&self) -> u16 {
        (self.frame.prio & libc::CAN_SFF_MASK) as u16
    }

    /// The 32-bit acceptance field.
    pub fn acceptance_field(&self) -> u32 {
        self.frame.af
    }

    /// The SDU (service data unit) type.
    pub fn sdu_type(&self) -> u8 {
        self.frame.sdt
    }

    /// The payload bytes of this message.
    pub fn data(&self) -> &[u8] {
        &self.frame.data[..usize::from(self.frame.len).min(CANXL_MAX_DLEN)]
    }

    /// The raw kernel frame, suitable for zero-copy retransmission.
    pub fn raw_frame(&self) -> &canxl_frame {
        &self.frame
    }
}

impl PartialEq for CanXlMessage {
    fn eq(&self, other: &Self) -> bool {
        self.frame.prio == other.frame.prio
            && self.frame.af == other.frame.af
            && self.data() == other.data()
    }
}

impl Eq for CanXlMessage {}

impl From<canxl_frame> for CanXlMessage {
    fn from(frame: canxl_frame) -> Self {
        Self::from_frame(frame)
    }
}

impl fmt::Debug for CanXlMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "CanXlMessage {{ prio: {:X}, af: {:X}, len: {} }}",
            self.frame.prio, self.frame.af, self.frame.len
        )
    }
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{
        CAN_ERR_CRTL, CAN_ERR_FLAG, CAN_ERR_LOSTARB, CAN_ERR_PROT, CAN_ERR_TRX,
        CAN_ERR_TX_TIMEOUT,
    };
    use crate::errors::{ProtocolLocation, ProtocolViolation};

    #[test]
    fn test_payload_round_trip() {
        let msg = CanMessage::new(0x123u32, b"TestData").unwrap();
        assert_eq!(msg.id(), CanId::new(0x123));
        assert_eq!(msg.data(), b"TestData");
        assert_eq!(msg.raw_frame().can_dlc, 8);
    }

    #[test]
    fn test_payload_bounds() {
        assert!(CanMessage::new(0x123u32, &[0u8; 8]).is_ok());
        assert!(matches!(
            CanMessage::new(0x123u32, &[0u8; 9]),
            Err(Error::PayloadTooLarge { len: 9, max: 8 })
        ));

        assert!(CanFdMessage::new(0x123u32, &[0u8; 64]).is_ok());
        assert!(matches!(
            CanFdMessage::new(0x123u32, &[0u8; 65]),
            Err(Error::PayloadTooLarge { len: 65, max: 64 })
        ));

        assert!(CanXlMessage::new(0x123, 0xdead_beef, &[0u8; 2048]).is_ok());
        assert!(matches!(
            CanXlMessage::new(0x123, 0xdead_beef, &[0u8; 2049]),
            Err(Error::PayloadTooLarge { len: 2049, max: 2048 })
        ));
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let a = CanMessage::new(0x123u32, b"abc").unwrap();
        let mut frame = can_frame_default();
        frame.can_id = 0x123;
        frame.can_dlc = 3;
        frame.data[..3].copy_from_slice(b"abc");
        let b = CanMessage::from_frame_stamped(frame, Duration::from_millis(100));

        assert_eq!(a, b);
        assert_eq!(b.timestamp_offset(), Some(Duration::from_millis(100)));
        assert_eq!(a.timestamp_offset(), None);
    }

    #[test]
    fn test_error_frame_tx_timeout() {
        let msg = CanMessage::new(CAN_ERR_FLAG | CAN_ERR_TX_TIMEOUT, b"").unwrap();
        assert!(msg.is_error_frame());
        assert!(msg.is_tx_timeout());
    }

    #[test]
    fn test_error_frame_lost_arbitration() {
        let msg = CanMessage::new(CAN_ERR_FLAG | CAN_ERR_LOSTARB, &[42]).unwrap();
        assert!(msg.has_lost_arbitration());
        assert_eq!(msg.arbitration_lost_bit(), 42);

        for bit in 0..=0xffu8 {
            let msg = CanMessage::new(CAN_ERR_FLAG | CAN_ERR_LOSTARB, &[bit]).unwrap();
            assert_eq!(msg.arbitration_lost_bit(), bit);
        }
    }

    #[test]
    fn test_error_frame_controller_problem() {
        let msg = CanMessage::new(CAN_ERR_FLAG | CAN_ERR_CRTL, &[0xff, 0x01]).unwrap();
        assert!(msg.has_controller_problem());
        assert_eq!(msg.controller_error(), ControllerError::ReceiveOverflow);

        let msg = CanMessage::new(CAN_ERR_FLAG | CAN_ERR_CRTL, &[0xff, 0x00]).unwrap();
        assert_eq!(msg.controller_error(), ControllerError::Unspecified);

        let msg = CanMessage::new(CAN_ERR_FLAG | CAN_ERR_CRTL, &[0xff, 0x40]).unwrap();
        assert_eq!(msg.controller_error(), ControllerError::RecoveredToActive);
    }

    #[test]
    fn test_error_frame_protocol_violation() {
        let msg =
            CanMessage::new(CAN_ERR_FLAG | CAN_ERR_PROT, &[0xff, 0xff, 0x04, 0x08]).unwrap();
        assert!(msg.has_protocol_violation());
        let err = msg.protocol_error();
        assert_eq!(err.violation, ProtocolViolation::BitStuffing);
        assert_eq!(err.location, ProtocolLocation::CrcSequence);
    }

    #[test]
    fn test_error_frame_transceiver_status() {
        let msg =
            CanMessage::new(CAN_ERR_FLAG | CAN_ERR_TRX, &[0, 0, 0, 0, 0x07]).unwrap();
        assert!(msg.has_transceiver_status());
        assert_eq!(
            msg.transceiver_error(),
            TransceiverError::CanHighShortToGnd
        );
    }

    #[test]
    fn test_error_frame_counters() {
        let msg = CanMessage::new(
            CAN_ERR_FLAG | CAN_ERR_CRTL,
            &[0, 0, 0, 0, 0, 0, 17, 42],
        )
        .unwrap();
        assert_eq!(msg.tx_error_counter(), 17);
        assert_eq!(msg.rx_error_counter(), 42);
    }

    #[test]
    fn test_error_frame_short_payload_reads_zero() {
        let msg = CanMessage::new(CAN_ERR_FLAG | CAN_ERR_CRTL, &[0xff]).unwrap();
        assert_eq!(msg.controller_error(), ControllerError::Unspecified);
        assert_eq!(msg.tx_error_counter(), 0);
    }

    #[test]
    fn test_fd_flags() {
        let msg =
            CanFdMessage::with_flags(0x123u32, b"x", FdFlags::BRS | FdFlags::ESI).unwrap();
        assert!(msg.is_bit_rate_switched());
        assert!(msg.is_error_state_indicated());

        let msg = CanFdMessage::new(0x123u32, b"x").unwrap();
        assert!(!msg.is_bit_rate_switched());
    }

    #[test]
    fn test_fd_classic_conversions() {
        let classic = CanMessage::new(0x123u32, b"abcd").unwrap();
        let fd = CanFdMessage::from(classic);
        assert_eq!(fd.id(), CanId::new(0x123));
        assert_eq!(fd.data(), b"abcd");

        let back = CanMessage::try_from(fd).unwrap();
        assert_eq!(back, classic);

        let large = CanFdMessage::new(0x123u32, &[0u8; 64]).unwrap();
        assert!(CanMessage::try_from(large).is_err());
    }

    #[test]
    fn test_xl_fields() {
        let msg = CanXlMessage::new(0x7ff, 0x1234_5678, b"payload").unwrap();
        assert_eq!(msg.priority(), 0x7ff);
        assert_eq!(msg.acceptance_field(), 0x1234_5678);
        assert_eq!(msg.sdu_type(), 0);
        assert_eq!(msg.data(), b"payload");
        assert_eq!(msg.raw_frame().flags & CANXL_XLF, CANXL_XLF);
    }

    #[test]
    fn test_embedded_frame_impl() {
        use embedded_can::StandardId;

        let msg =
            <CanMessage as EmbeddedFrame>::new(StandardId::new(0x123).unwrap(), b"ab").unwrap();
        assert_eq!(msg.data(), b"ab");
        assert!(!EmbeddedFrame::is_remote_frame(&msg));

        let rtr =
            <CanMessage as EmbeddedFrame>::new_remote(StandardId::new(0x123).unwrap(), 4).unwrap();
        assert!(rtr.is_remote_transmission_request());
        assert_eq!(EmbeddedFrame::dlc(&rtr), 4);

        assert!(<CanMessage as EmbeddedFrame>::new_remote(
            StandardId::new(0x123).unwrap(),
            9
        )
        .is_none());
    }

    #[test]
    fn test_upper_hex() {
        let msg = CanMessage::new(0x123u32, &[0x01, 0xab]).unwrap();
        assert_eq!(format!("{:X}", msg), "123#01 AB");
    }
}
