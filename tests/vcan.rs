// canio/tests/vcan.rs
//
// Integration tests against a virtual CAN interface.
//
// This file is part of the Rust 'canio' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! Integration tests that need a local virtual CAN interface.
//!
//! Set one up with:
//!
//! ```text
//! sudo modprobe vcan
//! sudo ip link add dev vcan0 type vcan
//! sudo ip link set up vcan0
//! ```

use canio::{CanDriver, CanFdDriver, CanFdMessage, CanMessage, Error, FilterMap, CAN_RAW};
use serial_test::serial;
use std::time::Duration;

const IFACE: &str = "vcan0";

#[test]
#[serial]
fn loopback_round_trip() {
    let driver = CanDriver::new(IFACE, CAN_RAW).unwrap();
    driver.set_receive_own_messages(true).unwrap();

    let sent = CanMessage::new(0x123u32, b"\x01\x02\x03").unwrap();
    let written = driver.send_message(&sent, false).unwrap();
    assert_eq!(written, std::mem::size_of::<libc::can_frame>());

    assert!(driver
        .wait_for_messages(Duration::from_millis(500))
        .unwrap());
    let received = driver.read_queued_messages().unwrap();
    assert!(received.contains(&sent));
}

#[test]
#[serial]
fn wait_times_out_on_silent_bus() {
    let driver = CanDriver::new(IFACE, CAN_RAW).unwrap();
    assert!(!driver
        .wait_for_messages(Duration::from_millis(100))
        .unwrap());
}

#[test]
#[serial]
fn drain_preserves_delivery_order() {
    let rx = CanDriver::new(IFACE, CAN_RAW).unwrap();
    let tx = CanDriver::new(IFACE, CAN_RAW).unwrap();

    let batch: Vec<CanMessage> = (0u32..5)
        .map(|i| CanMessage::new(0x100 + i, &[i as u8]).unwrap())
        .collect();
    tx.send_message_queue(&batch, Duration::ZERO, false).unwrap();

    let mut received = Vec::new();
    while received.len() < batch.len() {
        assert!(rx
            .wait_for_messages(Duration::from_millis(500))
            .unwrap());
        received.extend(rx.read_queued_messages().unwrap());
    }
    assert_eq!(received, batch);
}

#[test]
#[serial]
fn filters_are_idempotent() {
    let driver = CanDriver::new(IFACE, CAN_RAW).unwrap();

    let filters = FilterMap::from([(0x123u32.into(), 0x7ffu32)]);
    driver.set_can_filters(filters.clone()).unwrap();
    driver.set_can_filters(filters.clone()).unwrap();
    assert_eq!(driver.filters(), filters);
}

#[test]
#[serial]
fn option_configuration_is_idempotent() {
    let driver = CanDriver::new(IFACE, CAN_RAW).unwrap();

    for _ in 0..2 {
        driver.set_error_filter(true).unwrap();
        driver.set_loopback(true).unwrap();
        driver.set_join_filters(false).unwrap();
        driver.set_receive_own_messages(true).unwrap();
    }
}

#[test]
#[serial]
fn teardown_invalidates_the_driver() {
    let driver = CanDriver::new(IFACE, CAN_RAW).unwrap();

    driver.uninitialise().unwrap();
    assert!(matches!(driver.uninitialise(), Err(Error::Close(_))));
    assert!(matches!(driver.read_message(), Err(Error::InvalidSocket)));
    assert!(matches!(
        driver.send_message(&CanMessage::new(1u32, b"").unwrap(), false),
        Err(Error::InvalidSocket)
    ));
    assert_eq!(driver.socket_fd(), -1);
}

#[test]
#[serial]
fn fd_loopback_round_trip() {
    let driver = CanFdDriver::new(IFACE, CAN_RAW).unwrap();
    driver.set_receive_own_messages(true).unwrap();

    let sent = CanFdMessage::new(0x42u32, &[0xaa; 48]).unwrap();
    driver.send_fd_message(&sent, false).unwrap();

    assert!(driver
        .wait_for_messages(Duration::from_millis(500))
        .unwrap());
    let received = driver.read_queued_fd_messages().unwrap();
    assert!(received.contains(&sent));
}

#[test]
#[serial]
fn extended_flag_promotion() {
    let rx = CanDriver::new(IFACE, CAN_RAW).unwrap();
    let tx = CanDriver::new(IFACE, CAN_RAW).unwrap();

    // the 29-bit address does not fit the standard range, so the frame
    // must arrive marked extended even without forcing it
    let sent = CanMessage::new(0x0012_3456u32, b"x").unwrap();
    tx.send_message(&sent, false).unwrap();

    assert!(rx
        .wait_for_messages(Duration::from_millis(500))
        .unwrap());
    let received = rx.read_queued_messages().unwrap();
    assert!(received.iter().any(|m| m.is_extended_frame_id()));
}
