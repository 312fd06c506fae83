// canio/src/enumerate.rs
//
// Implements support for enumerating the available CAN interfaces.
//
// This file is part of the Rust 'canio' library.
//
// Licensed under the MIT license:
//   <LICENSE or http://opensource.org/licenses/MIT>
// This file may not be copied, modified, or distributed except according
// to those terms.

//! SocketCAN interface enumeration.

use crate::Result;
use nix::{
    ifaddrs::getifaddrs,
    sys::socket::{AddressFamily, SockaddrLike},
};
use std::io;

/// Scans the system for CAN network interfaces and returns their names.
///
/// An interface is reported when it carries an `AF_CAN` address or its
/// name contains "can" (which also covers interfaces that are down and
/// therefore have no address entry).
pub fn available_interfaces() -> Result<Vec<String>> {
    let mut interfaces: Vec<String> = Vec::new();

    for ifaddr in getifaddrs().map_err(io::Error::from)? {
        let is_can_family = ifaddr
            .address
            .as_ref()
            .and_then(|addr| addr.family())
            .map_or(false, |family| family == AddressFamily::Can);

        if (is_can_family || ifaddr.interface_name.contains("can"))
            && !interfaces.contains(&ifaddr.interface_name)
        {
            interfaces.push(ifaddr.interface_name);
        }
    }

    Ok(interfaces)
}
