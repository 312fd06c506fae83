// canio/src/nl.rs
//
// Netlink management of SocketCAN interfaces.
//
// This file is part of the Rust 'canio' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Netlink management of CAN interfaces.
//!
//! Netlink is the way a user-space application sets the parameters of a
//! CAN interface: its bitrate, and whether it is up or down. This module
//! wraps the route-netlink messages needed to prepare an interface
//! before a [`CanDriver`](crate::CanDriver) is bound to it; the driver
//! itself never talks netlink.
//!
//! The SocketCAN netlink API is not really documented anywhere; the
//! attribute constants and structs come from the Linux kernel header
//! <https://github.com/torvalds/linux/blob/master/include/uapi/linux/can/netlink.h?ts=4>
//! and the processing code in
//! <https://github.com/torvalds/linux/blob/master/drivers/net/can/dev/netlink.c?ts=4>.
//!
//! Most operations here require the `CAP_NET_ADMIN` capability, like the
//! root user has.

use log::debug;
use neli::{
    consts::{
        nl::{NlType, NlmF, NlmFFlags},
        rtnl::{Arphrd, Ifla, IflaInfo, IffFlags, RtAddrFamily, RtaType, Rtm},
        socket::NlFamily,
    },
    err::NlError,
    neli_enum,
    nl::{NlPayload, Nlmsghdr},
    rtnl::{Ifinfomsg, Rtattr},
    socket::NlSocketHandle,
    types::{Buffer, RtBuffer},
    FromBytes, Size, ToBytes,
};
use nix::{net::if_::if_nametoindex, unistd};
use std::{
    fmt::Debug,
    mem::size_of,
    os::raw::{c_int, c_uint},
};

/// CAN netlink interface attributes, from `linux/can/netlink.h`.
///
/// These nested attributes live under `IFLA_INFO_DATA` for a CAN link.
/// They are currently missing from `neli`/`libc`, so they are declared
/// here. Only [`IflaCan::BitTiming`] is used by this crate, but the full
/// set is listed to match the kernel ABI.
#[neli_enum(serialized_type = "libc::c_ushort")]
pub enum IflaCan {
    Unspec = 0,
    BitTiming = 1,
    BitTimingConst = 2,
    Clock = 3,
    State = 4,
    CtrlMode = 5,
    RestartMs = 6,
    Restart = 7,
    BerrCounter = 8,
    DataBitTiming = 9,
    DataBitTimingConst = 10,
    Termination = 11,
    TerminationConst = 12,
    BitRateConst = 13,
    DataBitRateConst = 14,
    BitRateMax = 15,
    Tdc = 16,
    CtrlModeExt = 17,
}

impl RtaType for IflaCan {}

/// A result for netlink errors.
pub type NlResult<T> = Result<T, NlError>;

/// CAN bit-timing parameters, from `linux/can/netlink.h`.
///
/// Only the bitrate (and optionally the sample point) need to be filled
/// in; the kernel computes the remaining segments itself.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, FromBytes, ToBytes)]
#[allow(non_camel_case_types)]
pub struct can_bittiming {
    /// Bit-rate in bits/second
    pub bitrate: u32,
    /// Sample point in one-tenth of a percent
    pub sample_point: u32,
    /// Time quanta (TQ) in nanoseconds
    pub tq: u32,
    /// Propagation segment in TQs
    pub prop_seg: u32,
    /// Phase buffer segment 1 in TQs
    pub phase_seg1: u32,
    /// Phase buffer segment 2 in TQs
    pub phase_seg2: u32,
    /// Synchronisation jump width in TQs
    pub sjw: u32,
    /// Bit-rate prescaler
    pub brp: u32,
}

impl Size for can_bittiming {
    fn unpadded_size(&self) -> usize {
        size_of::<can_bittiming>()
    }
}

/// One-shot helper: configure the bitrate of a CAN interface and bring
/// it up.
///
/// This is the usual preparation step before constructing a
/// [`CanDriver`](crate::CanDriver). The bitrate cannot be changed while
/// the interface is up; for interfaces without bit timing (vcan), use
/// [`CanInterface::bring_up`] directly.
///
/// PRIVILEGED: This requires root privilege.
pub fn set_interface_up(interface: &str, bitrate: u32) -> NlResult<()> {
    let iface = CanInterface::open(interface)
        .map_err(|err| NlError::Msg(format!("interface lookup failed: {}", err)))?;

    iface.set_bitrate(bitrate)?;
    iface.bring_up()?;

    debug!("{}: configured for {} bit/s and brought up", interface, bitrate);
    Ok(())
}

/// A netlink handle to one CAN network interface.
///
/// Note that while this API is designed in an RAII fashion, it cannot
/// really make the same guarantees: it is entirely possible for another
/// user or process to modify, remove and re-add an interface while you
/// are holding this object with a reference to it.
#[allow(missing_copy_implementations)]
#[derive(Debug)]
pub struct CanInterface {
    if_index: c_uint,
}

impl CanInterface {
    /// Opens a CAN interface by name.
    ///
    /// Similar to [`open_iface`](Self::open_iface), but looks up the
    /// device by name instead of the interface index.
    pub fn open(ifname: &str) -> Result<Self, nix::Error> {
        let if_index = if_nametoindex(ifname)?;
        Ok(Self::open_iface(if_index))
    }

    /// Opens a CAN interface by kernel interface index.
    ///
    /// No checks are performed; the interface with the specified index
    /// need not actually exist until the first operation.
    pub fn open_iface(if_index: u32) -> Self {
        Self {
            if_index: if_index as c_uint,
        }
    }

    /// Brings this interface up.
    ///
    /// PRIVILEGED: This requires root privilege.
    pub fn bring_up(&self) -> NlResult<()> {
        let info = Ifinfomsg::up(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            RtBuffer::new(),
        );
        Self::send_info_msg(Rtm::Newlink, info, &[])
    }

    /// Brings this interface down.
    ///
    /// PRIVILEGED: This requires root privilege.
    pub fn bring_down(&self) -> NlResult<()> {
        let info = Ifinfomsg::down(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            RtBuffer::new(),
        );
        Self::send_info_msg(Rtm::Newlink, info, &[])
    }

    /// Sets the bitrate of this interface, in bits per second.
    ///
    /// The bitrate can *not* be changed while the interface is up.
    ///
    /// PRIVILEGED: This requires root privilege.
    pub fn set_bitrate(&self, bitrate: u32) -> NlResult<()> {
        let timing = can_bittiming {
            bitrate,
            ..can_bittiming::default()
        };

        let info = self.info_msg({
            let mut data = Rtattr::new(None, IflaInfo::Data, Buffer::new())?;
            data.add_nested_attribute(&Rtattr::new(None, IflaCan::BitTiming, timing)?)?;

            let mut link_info = Rtattr::new(None, Ifla::Linkinfo, Buffer::new())?;
            link_info.add_nested_attribute(&Rtattr::new(None, IflaInfo::Kind, "can")?)?;
            link_info.add_nested_attribute(&data)?;

            let mut rtattrs = RtBuffer::new();
            rtattrs.push(link_info);
            rtattrs
        });
        Self::send_info_msg(Rtm::Newlink, info, &[])
    }

    /// Creates an `Ifinfomsg` for this interface from a buffer of
    /// attributes.
    fn info_msg(&self, buf: RtBuffer<Ifla, Buffer>) -> Ifinfomsg {
        Ifinfomsg::new(
            RtAddrFamily::Unspecified,
            Arphrd::Netrom,
            self.if_index as c_int,
            IffFlags::empty(),
            IffFlags::empty(),
            buf,
        )
    }

    /// Sends an info message to the kernel.
    fn send_info_msg(msg_type: Rtm, info: Ifinfomsg, additional_flags: &[NlmF]) -> NlResult<()> {
        let mut nl = Self::open_route_socket()?;

        let hdr = Nlmsghdr::new(
            None,
            msg_type,
            {
                let mut flags = NlmFFlags::new(&[NlmF::Request, NlmF::Ack]);
                for flag in additional_flags {
                    flags.set(flag);
                }
                flags
            },
            None,
            None,
            NlPayload::Payload(info),
        );
        Self::send_and_read_ack(&mut nl, hdr)
    }

    /// Sends a message down a netlink socket, and checks that an ACK was
    /// properly received.
    fn send_and_read_ack<T, P>(sock: &mut NlSocketHandle, msg: Nlmsghdr<T, P>) -> NlResult<()>
    where
        T: NlType + Debug,
        P: ToBytes + Debug,
    {
        sock.send(msg)?;

        // This will produce an Err if the response is a netlink error,
        // no need to match.
        if let Some(Nlmsghdr {
            nl_payload: NlPayload::Ack(_),
            ..
        }) = sock.recv()?
        {
            Ok(())
        } else {
            Err(NlError::NoAck)
        }
    }

    /// Opens a new netlink route socket, bound to this process' PID.
    fn open_route_socket<T, P>() -> Result<NlSocketHandle, NlError<T, P>> {
        // groups is set to None(0), because we want no notifications
        let pid = unistd::getpid().as_raw() as u32;
        let sock = NlSocketHandle::connect(NlFamily::Route, Some(pid), &[])?;
        Ok(sock)
    }
}
