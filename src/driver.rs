// canio/src/driver.rs
//
// Implements the SocketCAN bus driver.
//
// This file is part of the Rust 'canio' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! The CAN bus driver.
//!
//! A [`CanDriver`] owns one raw CAN socket bound to one interface. The
//! socket is opened in non-blocking mode; the only operation that
//! deliberately blocks is [`CanDriver::wait_for_messages`], which is
//! bounded by its timeout.
//!
//! One driver instance may be shared between threads. Two independent
//! locks partition the concurrency:
//!
//! - the *read path* lock serializes [`wait_for_messages`],
//!   [`read_message`], [`read_queued_messages`] and [`uninitialise`], and
//!   guards the cached queue-size accounting. A batch drain holds it for
//!   the whole batch, so drains are atomic with respect to other readers.
//! - the *write path* lock serializes [`send_message`]. It is independent
//!   of the read path, matching the kernel socket's independent receive
//!   and transmit buffers: a send in progress never blocks a concurrent
//!   read, and vice versa.
//!
//! There is no reconnect: a driver whose initialisation failed, or that
//! has been torn down, must be discarded and recreated.
//!
//! [`wait_for_messages`]: CanDriver::wait_for_messages
//! [`read_message`]: CanDriver::read_message
//! [`read_queued_messages`]: CanDriver::read_queued_messages
//! [`send_message`]: CanDriver::send_message
//! [`uninitialise`]: CanDriver::uninitialise

use crate::{
    addr::CanAddr,
    as_bytes, as_bytes_mut,
    id::{CanId, ERR_MASK_ALL, ERR_MASK_NONE},
    message::{can_frame_default, canfd_frame_default, CanFdMessage, CanMessage},
    Error, Result,
};
use libc::{c_int, c_void, can_frame, canfd_frame, CAN_EFF_FLAG, CAN_SFF_MASK};
use log::{debug, trace, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    collections::HashMap,
    io,
    mem::size_of,
    ops,
    os::fd::BorrowedFd,
    os::unix::io::{AsRawFd, IntoRawFd, RawFd},
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

pub use libc::{
    AF_CAN, CANFD_MAX_DLEN, CANFD_MTU, CAN_MAX_DLEN, CAN_MTU, CAN_RAW, CAN_RAW_ERR_FILTER,
    CAN_RAW_FD_FRAMES, CAN_RAW_FILTER, CAN_RAW_JOIN_FILTERS, CAN_RAW_LOOPBACK,
    CAN_RAW_RECV_OWN_MSGS, SOL_CAN_RAW,
};

/// A separate raw CAN protocol number used by certain embedded device
/// OEMs in place of [`CAN_RAW`].
pub const CAN_SOCK_SEVEN: c_int = 7;

/// Socket option to enable CAN XL frames, from `linux/can/raw.h`.
/// Not covered by the libc crate yet.
pub const CAN_RAW_XL_FRAMES: c_int = 7;

// get a receive timestamp in a struct timespec (ns accuracy)
const SIOCGSTAMPNS: libc::c_ulong = 0x8907;

/// The kernel-side acceptance filter configuration of a driver.
///
/// Each entry maps a filter identifier to its mask; a received frame is
/// delivered when `received_id & mask == filter_id & mask` holds for at
/// least one entry.
pub type FilterMap = HashMap<CanId, u32>;

/// Mutable read-path state, guarded by the read lock.
#[derive(Debug)]
struct ReadState {
    /// Frames counted by the last readiness wait.
    queue_size: usize,
    /// Whether the interface answers the queued-byte-count query.
    queue_size_known: bool,
    /// First kernel timestamp seen, for relative telemetry offsets.
    first_stamp: Option<Duration>,
}

/// A driver for one CAN bus interface.
///
/// See the [module docs](self) for the concurrency model. All operations
/// take `&self`; the driver is safe to share across threads (e.g. in an
/// `Arc`) as long as only the documented operations are used.
#[derive(Debug)]
pub struct CanDriver {
    interface: String,
    protocol: c_int,
    default_sender_id: AtomicU32,
    filters: Mutex<FilterMap>,
    collect_telemetry: AtomicBool,
    relative_timestamps: AtomicBool,
    /// The socket descriptor; -1 once the driver is closed.
    fd: AtomicI32,
    read: Mutex<ReadState>,
    write: Mutex<()>,
}

impl CanDriver {
    /// Opens a driver on the named interface with an accept-all filter.
    ///
    /// `protocol` is the raw CAN protocol number, normally [`CAN_RAW`].
    pub fn new(interface: &str, protocol: c_int) -> Result<Self> {
        Self::with_filters(interface, protocol, FilterMap::new())
    }

    /// Opens a driver with a single filter id/mask pair.
    pub fn with_filter_mask(
        interface: &str,
        protocol: c_int,
        mask: u32,
        filter_id: CanId,
    ) -> Result<Self> {
        Self::with_filters(interface, protocol, FilterMap::from([(filter_id, mask)]))
    }

    /// Opens a driver with a set of kernel-side acceptance filters.
    ///
    /// An empty map accepts every frame (a single filter matching id 0
    /// with mask 0).
    ///
    /// Initialisation is synchronous: open the socket, resolve the
    /// interface name, switch to non-blocking mode, apply the filters and
    /// bind. The first failing step unwinds the whole construction with
    /// [`Error::Init`] naming the step; no driver value is returned.
    pub fn with_filters(interface: &str, protocol: c_int, filters: FilterMap) -> Result<Self> {
        let fd = Self::initialise(interface, protocol, &filters)?;

        Ok(Self {
            interface: interface.to_string(),
            protocol,
            default_sender_id: AtomicU32::new(0),
            filters: Mutex::new(filters),
            collect_telemetry: AtomicBool::new(false),
            relative_timestamps: AtomicBool::new(false),
            fd: AtomicI32::new(fd),
            read: Mutex::new(ReadState {
                queue_size: 0,
                queue_size_known: true,
                first_stamp: None,
            }),
            write: Mutex::new(()),
        })
    }

    fn initialise(interface: &str, protocol: c_int, filters: &FilterMap) -> Result<RawFd> {
        let sock = Socket::new_raw(
            Domain::from(AF_CAN),
            Type::RAW,
            Some(Protocol::from(protocol)),
        )
        .map_err(|e| Error::Init {
            action: "open CAN socket",
            source: e,
        })?;

        let addr = CanAddr::from_iface(interface).map_err(|e| Error::Init {
            action: "resolve interface index",
            source: e,
        })?;

        sock.set_nonblocking(true).map_err(|e| Error::Init {
            action: "set non-blocking mode",
            source: e,
        })?;

        apply_filters(sock.as_raw_fd(), filters)?;

        sock.bind(&addr.into()).map_err(|e| Error::Init {
            action: "bind socket to interface",
            source: e,
        })?;

        debug!("bound CAN socket to {} (fd {})", interface, sock.as_raw_fd());
        Ok(sock.into_raw_fd())
    }

    /// The interface this driver is bound to.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// The raw CAN protocol number the socket was opened with.
    pub fn protocol(&self) -> c_int {
        self.protocol
    }

    /// The socket file descriptor, or -1 once the driver is closed.
    pub fn socket_fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    /// The identifier to send messages with when no other id is set.
    pub fn default_sender_id(&self) -> CanId {
        CanId::new(self.default_sender_id.load(Ordering::Relaxed))
    }

    /// Sets the default sender identifier.
    pub fn set_default_sender_id(&self, id: impl Into<CanId>) {
        self.default_sender_id
            .store(id.into().raw(), Ordering::Relaxed);
    }

    /// The filter configuration last applied to the socket.
    pub fn filters(&self) -> FilterMap {
        self.lock_filters().clone()
    }

    /// The number of frames counted by the last call to
    /// [`wait_for_messages`](Self::wait_for_messages), or zero when the
    /// interface does not support queue-size reporting.
    pub fn message_queue_size(&self) -> usize {
        self.lock_read().queue_size
    }

    /// Whether the interface answers the queued-byte-count query.
    ///
    /// Virtual interfaces typically do not; once that has been detected
    /// the driver permanently falls back to read-until-would-block
    /// drains.
    pub fn queue_size_supported(&self) -> bool {
        self.lock_read().queue_size_known
    }

    /// Blocks until one or more messages are available on the bus, or
    /// until the timeout elapses.
    ///
    /// Afterwards the number of queued frames is cached for
    /// [`read_queued_messages`](Self::read_queued_messages). Returns
    /// `true` if at least one frame is ready.
    pub fn wait_for_messages(&self, timeout: Duration) -> Result<bool> {
        let fd = self.fd()?;
        let mut state = self.lock_read();

        let poll_fd = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut poll_fds = [PollFd::new(poll_fd, PollFlags::POLLIN)];
        let poll_timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
        let available = poll(&mut poll_fds, poll_timeout).map_err(io::Error::from)?;

        if state.queue_size_known {
            let mut bytes_available: c_int = 0;
            let ret = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut bytes_available) };
            if ret == 0 {
                let frame_size = size_of::<can_frame>();
                state.queue_size = (bytes_available as usize + frame_size - 1) / frame_size;
            } else {
                // vcan and friends do not implement FIONREAD; fall back
                // to read-until-would-block drains from here on
                warn!(
                    "{}: interface does not report its queue size, \
                     falling back to exhaustive drains",
                    self.interface
                );
                state.queue_size_known = false;
                state.queue_size = 0;
            }
        }

        trace!(
            "{}: wait returned {}, {} frame(s) queued",
            self.interface,
            available,
            state.queue_size
        );
        Ok(available > 0)
    }

    /// Reads a single message from the bus.
    ///
    /// Issues exactly one read syscall. Call after
    /// [`wait_for_messages`](Self::wait_for_messages) has signalled
    /// readiness; on an empty queue this fails with a `WouldBlock` I/O
    /// error.
    pub fn read_message(&self) -> Result<CanMessage> {
        let mut state = self.lock_read();
        self.read_message_locked(&mut state)
    }

    /// Reads all currently queued messages in kernel delivery order.
    ///
    /// The read lock is held for the whole batch, so the drain is atomic
    /// with respect to other readers. When the queue size is known, the
    /// cached count of frames is read; otherwise frames are read until
    /// the socket would block, which ends the drain normally.
    pub fn read_queued_messages(&self) -> Result<Vec<CanMessage>> {
        self.fd()?;
        let mut state = self.lock_read();
        let mut messages = Vec::new();

        if state.queue_size_known {
            let count = state.queue_size;
            messages.reserve(count);
            for _ in 0..count {
                match self.read_message_locked(&mut state) {
                    Ok(msg) => messages.push(msg),
                    // the byte count rounds up, so the last frame may not
                    // actually be there
                    Err(Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            state.queue_size = 0;
        } else {
            loop {
                match self.read_message_locked(&mut state) {
                    Ok(msg) => messages.push(msg),
                    Err(Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
        }

        debug!(
            "{}: drained {} message(s)",
            self.interface,
            messages.len()
        );
        Ok(messages)
    }

    /// Sends a single message on the bus, returning the bytes written.
    ///
    /// The payload bound is checked before any syscall is issued. The
    /// extended-format flag is set on the outgoing identifier when
    /// `force_extended` is given or the address exceeds the standard
    /// 11-bit range.
    pub fn send_message(&self, message: &CanMessage, force_extended: bool) -> Result<usize> {
        let fd = self.fd()?;

        let len = usize::from(message.raw_frame().can_dlc);
        if len > CAN_MAX_DLEN {
            return Err(Error::PayloadTooLarge {
                len,
                max: CAN_MAX_DLEN,
            });
        }

        let _guard = self.lock_write();

        let mut frame = *message.raw_frame();
        if force_extended || message.id().address() > CAN_SFF_MASK {
            frame.can_id |= CAN_EFF_FLAG;
        }

        let written = unsafe {
            libc::write(
                fd,
                &frame as *const can_frame as *const c_void,
                size_of::<can_frame>(),
            )
        };
        if written < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if written as usize != size_of::<can_frame>() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short CAN frame write").into());
        }
        Ok(written as usize)
    }

    /// Sends a sequence of messages, returning the total bytes written.
    ///
    /// A non-zero `delay` is slept between consecutive sends, which is
    /// useful for rate-limiting bus injection. The first failing send
    /// aborts the batch and propagates its error.
    pub fn send_message_queue(
        &self,
        messages: &[CanMessage],
        delay: Duration,
        force_extended: bool,
    ) -> Result<usize> {
        let mut total_bytes = 0;
        for (i, message) in messages.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                thread::sleep(delay);
            }
            total_bytes += self.send_message(message, force_extended)?;
        }
        Ok(total_bytes)
    }

    /// Applies a new set of kernel-side acceptance filters.
    ///
    /// An empty map accepts every frame. Re-applying the same
    /// configuration is safe.
    pub fn set_can_filters(&self, filters: FilterMap) -> Result<()> {
        let fd = self.fd()?;
        apply_filters(fd, &filters)?;
        *self.lock_filters() = filters;
        Ok(())
    }

    /// Applies a single filter id/mask pair.
    pub fn set_can_filter_mask(&self, mask: u32, filter_id: CanId) -> Result<()> {
        self.set_can_filters(FilterMap::from([(filter_id, mask)]))
    }

    /// Enables or disables reception of CAN FD frames on the socket.
    pub fn allow_can_fd_frames(&self, enabled: bool) -> Result<()> {
        set_socket_option(
            self.fd()?,
            SOL_CAN_RAW,
            CAN_RAW_FD_FRAMES,
            &c_int::from(enabled),
            "enable CAN FD frames",
        )
    }

    /// Enables or disables reception of CAN XL frames on the socket.
    pub fn allow_can_xl_frames(&self, enabled: bool) -> Result<()> {
        set_socket_option(
            self.fd()?,
            SOL_CAN_RAW,
            CAN_RAW_XL_FRAMES,
            &c_int::from(enabled),
            "enable CAN XL frames",
        )
    }

    /// Enables or disables joined filters.
    ///
    /// By default a frame is accepted when it matches *any* configured
    /// filter; with joined filters it has to match *all* of them.
    pub fn set_join_filters(&self, enabled: bool) -> Result<()> {
        set_socket_option(
            self.fd()?,
            SOL_CAN_RAW,
            CAN_RAW_JOIN_FILTERS,
            &c_int::from(enabled),
            "join CAN filters",
        )
    }

    /// Subscribes to, or unsubscribes from, error frames.
    ///
    /// Enabling subscribes to every error class; see
    /// [`set_error_mask`](Self::set_error_mask) for a finer selection.
    pub fn set_error_filter(&self, enabled: bool) -> Result<()> {
        self.set_error_mask(if enabled { ERR_MASK_ALL } else { ERR_MASK_NONE })
    }

    /// Sets the error mask selecting which error classes are delivered
    /// as error frames.
    pub fn set_error_mask(&self, mask: u32) -> Result<()> {
        set_socket_option(
            self.fd()?,
            SOL_CAN_RAW,
            CAN_RAW_ERR_FILTER,
            &mask,
            "set error filter mask",
        )
    }

    /// Enables or disables reception of messages sent by this socket.
    pub fn set_receive_own_messages(&self, enabled: bool) -> Result<()> {
        set_socket_option(
            self.fd()?,
            SOL_CAN_RAW,
            CAN_RAW_RECV_OWN_MSGS,
            &c_int::from(enabled),
            "enable reception of own messages",
        )
    }

    /// Enables or disables local loopback of sent messages to other
    /// sockets on the same host.
    pub fn set_loopback(&self, enabled: bool) -> Result<()> {
        set_socket_option(
            self.fd()?,
            SOL_CAN_RAW,
            CAN_RAW_LOOPBACK,
            &c_int::from(enabled),
            "set loopback mode",
        )
    }

    /// Enables or disables collection of kernel receive timestamps.
    ///
    /// When enabled, every read additionally queries the kernel receive
    /// timestamp and stamps the resulting message; a failed query is a
    /// hard I/O error.
    pub fn set_collect_telemetry(&self, enabled: bool) {
        self.collect_telemetry.store(enabled, Ordering::Relaxed);
    }

    /// Makes collected timestamps relative to the first received frame
    /// instead of absolute kernel time.
    pub fn set_return_relative_timestamps(&self, enabled: bool) {
        self.relative_timestamps.store(enabled, Ordering::Relaxed);
    }

    /// Closes the socket and invalidates the driver.
    ///
    /// The handle is invalidated *before* the close syscall, so a failed
    /// close still leaves the driver in the closed state and a repeated
    /// teardown cannot close a recycled descriptor. Fails with
    /// [`Error::Close`] if the close syscall fails or the socket was
    /// already closed.
    pub fn uninitialise(&self) -> Result<()> {
        let _state = self.lock_read();

        let fd = self.fd.swap(-1, Ordering::AcqRel);
        if fd < 0 {
            return Err(Error::Close(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket already closed",
            )));
        }
        if unsafe { libc::close(fd) } == -1 {
            return Err(Error::Close(io::Error::last_os_error()));
        }

        debug!("closed CAN socket on {} (fd {})", self.interface, fd);
        Ok(())
    }

    // ===== private helpers =====

    /// The open socket descriptor, or `InvalidSocket` once closed.
    fn fd(&self) -> Result<RawFd> {
        match self.fd.load(Ordering::Acquire) {
            fd if fd < 0 => Err(Error::InvalidSocket),
            fd => Ok(fd),
        }
    }

    fn lock_read(&self) -> MutexGuard<'_, ReadState> {
        self.read.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_write(&self) -> MutexGuard<'_, ()> {
        self.write.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_filters(&self) -> MutexGuard<'_, FilterMap> {
        self.filters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Single-frame read for callers already holding the read lock.
    fn read_message_locked(&self, state: &mut ReadState) -> Result<CanMessage> {
        let fd = self.fd()?;

        let mut frame = can_frame_default();
        let read_rv = unsafe {
            libc::read(
                fd,
                &mut frame as *mut can_frame as *mut c_void,
                size_of::<can_frame>(),
            )
        };
        if read_rv < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if read_rv as usize != size_of::<can_frame>() {
            return Err(
                io::Error::new(io::ErrorKind::UnexpectedEof, "truncated CAN frame read").into(),
            );
        }
        state.queue_size = state.queue_size.saturating_sub(1);

        let msg = match self.telemetry_offset(fd, state)? {
            Some(offset) => CanMessage::from_frame_stamped(frame, offset),
            None => CanMessage::from_frame(frame),
        };
        Ok(msg)
    }

    /// Queries the kernel receive timestamp of the last read frame, if
    /// telemetry collection is enabled.
    fn telemetry_offset(&self, fd: RawFd, state: &mut ReadState) -> Result<Option<Duration>> {
        if !self.collect_telemetry.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let stamp = read_frame_timestamp(fd)?;
        let offset = if self.relative_timestamps.load(Ordering::Relaxed) {
            let first = *state.first_stamp.get_or_insert(stamp);
            stamp.saturating_sub(first)
        } else {
            stamp
        };
        Ok(Some(offset))
    }
}

impl Drop for CanDriver {
    fn drop(&mut self) {
        self.uninitialise().ok(); // ignore result
    }
}

// ===== CanFdDriver =====

/// A driver for a CAN FD capable interface.
///
/// Behaves like [`CanDriver`], but enables CAN FD frames during
/// initialisation and reads frames of either MTU: a classic-sized read is
/// promoted to an FD message with no FD flags set.
///
/// The driver dereferences to [`CanDriver`] for the shared configuration
/// and readiness operations.
#[derive(Debug)]
pub struct CanFdDriver {
    inner: CanDriver,
}

impl CanFdDriver {
    /// Opens an FD driver on the named interface with an accept-all
    /// filter.
    pub fn new(interface: &str, protocol: c_int) -> Result<Self> {
        Self::with_filters(interface, protocol, FilterMap::new())
    }

    /// Opens an FD driver with a set of kernel-side acceptance filters.
    pub fn with_filters(interface: &str, protocol: c_int, filters: FilterMap) -> Result<Self> {
        let inner = CanDriver::with_filters(interface, protocol, filters)?;
        inner.allow_can_fd_frames(true)?;
        Ok(Self { inner })
    }

    /// Reads a single FD message from the bus.
    pub fn read_fd_message(&self) -> Result<CanFdMessage> {
        let mut state = self.inner.lock_read();
        self.read_fd_message_locked(&mut state)
    }

    /// Reads all currently queued FD messages in kernel delivery order.
    ///
    /// Mixed classic/FD traffic defeats the byte-count queue accounting,
    /// so FD drains always read until the socket would block.
    pub fn read_queued_fd_messages(&self) -> Result<Vec<CanFdMessage>> {
        self.inner.fd()?;
        let mut state = self.inner.lock_read();
        let mut messages = Vec::new();

        loop {
            match self.read_fd_message_locked(&mut state) {
                Ok(msg) => messages.push(msg),
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        debug!(
            "{}: drained {} FD message(s)",
            self.inner.interface,
            messages.len()
        );
        Ok(messages)
    }

    /// Sends a single FD message on the bus, returning the bytes written.
    pub fn send_fd_message(&self, message: &CanFdMessage, force_extended: bool) -> Result<usize> {
        let fd = self.inner.fd()?;

        let len = usize::from(message.raw_frame().len);
        if len > CANFD_MAX_DLEN {
            return Err(Error::PayloadTooLarge {
                len,
                max: CANFD_MAX_DLEN,
            });
        }

        let _guard = self.inner.lock_write();

        let mut frame = *message.raw_frame();
        if force_extended || message.id().address() > CAN_SFF_MASK {
            frame.can_id |= CAN_EFF_FLAG;
        }

        let written = unsafe {
            libc::write(
                fd,
                &frame as *const canfd_frame as *const c_void,
                size_of::<canfd_frame>(),
            )
        };
        if written < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if written as usize != size_of::<canfd_frame>() {
            return Err(
                io::Error::new(io::ErrorKind::WriteZero, "short CAN FD frame write").into(),
            );
        }
        Ok(written as usize)
    }

    fn read_fd_message_locked(&self, state: &mut ReadState) -> Result<CanFdMessage> {
        let fd = self.inner.fd()?;

        let mut fdframe = canfd_frame_default();
        let read_rv = unsafe {
            libc::read(
                fd,
                &mut fdframe as *mut canfd_frame as *mut c_void,
                size_of::<canfd_frame>(),
            )
        };
        if read_rv < 0 {
            return Err(io::Error::last_os_error().into());
        }
        state.queue_size = state.queue_size.saturating_sub(1);

        let offset = self.inner.telemetry_offset(fd, state)?;
        match read_rv as usize {
            // a classic-sized read is, by definition, a classic frame
            CAN_MTU => {
                let mut frame = can_frame_default();
                as_bytes_mut(&mut frame)[..CAN_MTU].copy_from_slice(&as_bytes(&fdframe)[..CAN_MTU]);
                let msg = match offset {
                    Some(offset) => CanMessage::from_frame_stamped(frame, offset),
                    None => CanMessage::from_frame(frame),
                };
                Ok(msg.into())
            }
            CANFD_MTU => {
                let msg = match offset {
                    Some(offset) => CanFdMessage::from_frame_stamped(fdframe, offset),
                    None => CanFdMessage::from_frame(fdframe),
                };
                Ok(msg)
            }
            _ => Err(
                io::Error::new(io::ErrorKind::UnexpectedEof, "truncated CAN FD frame read").into(),
            ),
        }
    }
}

impl ops::Deref for CanFdDriver {
    type Target = CanDriver;

    fn deref(&self) -> &CanDriver {
        &self.inner
    }
}

// ===== free helpers =====

/// `setsockopt` wrapper for a single value.
///
/// On failure the OS error is wrapped in [`Error::Init`] with `action`
/// naming the configuration step.
fn set_socket_option<T>(
    fd: RawFd,
    level: c_int,
    name: c_int,
    val: &T,
    action: &'static str,
) -> Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            val as *const _ as *const c_void,
            size_of::<T>() as libc::socklen_t,
        )
    };

    match ret {
        0 => Ok(()),
        _ => Err(Error::Init {
            action,
            source: io::Error::last_os_error(),
        }),
    }
}

/// `setsockopt` wrapper for an array of values.
fn set_socket_option_mult<T>(
    fd: RawFd,
    level: c_int,
    name: c_int,
    values: &[T],
    action: &'static str,
) -> Result<()> {
    let ret = if values.is_empty() {
        // can't pass in a ptr to a 0-len slice, pass a null ptr instead
        unsafe { libc::setsockopt(fd, level, name, std::ptr::null(), 0) }
    } else {
        unsafe {
            libc::setsockopt(
                fd,
                level,
                name,
                values.as_ptr().cast(),
                std::mem::size_of_val(values) as libc::socklen_t,
            )
        }
    };

    match ret {
        0 => Ok(()),
        _ => Err(Error::Init {
            action,
            source: io::Error::last_os_error(),
        }),
    }
}

/// Translates a filter map into the kernel filter list and applies it.
fn apply_filters(fd: RawFd, filters: &FilterMap) -> Result<()> {
    // an empty mapping accepts everything: match id 0 with mask 0
    let list: Vec<libc::can_filter> = if filters.is_empty() {
        vec![libc::can_filter {
            can_id: 0,
            can_mask: 0,
        }]
    } else {
        filters
            .iter()
            .map(|(id, mask)| libc::can_filter {
                can_id: id.raw(),
                can_mask: *mask,
            })
            .collect()
    };

    trace!("applying {} CAN filter(s) to fd {}", list.len(), fd);
    set_socket_option_mult(fd, SOL_CAN_RAW, CAN_RAW_FILTER, &list, "apply CAN filters")
}

/// Queries the kernel receive timestamp of the last frame read from the
/// socket.
fn read_frame_timestamp(fd: RawFd) -> Result<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    let ret = unsafe { libc::ioctl(fd, SIOCGSTAMPNS as _, &mut ts) };
    if ret == -1 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

/////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonexistent_interface() {
        // no driver value comes back, only the failed step
        assert!(matches!(
            CanDriver::new("invalid", CAN_RAW),
            Err(Error::Init { .. })
        ));
    }

    #[test]
    fn test_oversized_frame_rejected_in_construction() {
        // a 9 byte payload cannot even become a message, so it can never
        // reach a send syscall
        assert!(matches!(
            CanMessage::new(0x123u32, &[0u8; 9]),
            Err(Error::PayloadTooLarge { len: 9, max: 8 })
        ));
    }
}
