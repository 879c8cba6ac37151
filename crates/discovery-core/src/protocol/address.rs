//! Fixed-width socket address encoding used inside announcement bodies.
//!
//! Layout (20 bytes): `family: u8`, one zero byte, `port: u16` big-endian,
//! then 16 address bytes. IPv4 addresses use the first four and leave the
//! rest zeroed.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

pub const ENCODED_LEN: usize = 20;

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

/// Write `addr` into the first `ENCODED_LEN` bytes of `out`.
pub fn encode(addr: &SocketAddr, out: &mut [u8]) {
    let out = &mut out[..ENCODED_LEN];
    out.fill(0);
    out[2..4].copy_from_slice(&addr.port().to_be_bytes());
    match addr.ip() {
        IpAddr::V4(ip) => {
            out[0] = FAMILY_V4;
            out[4..8].copy_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            out[0] = FAMILY_V6;
            out[4..20].copy_from_slice(&ip.octets());
        }
    }
}

/// Read an address written by [`encode`]. Returns the unknown family byte on failure.
pub fn decode(data: &[u8]) -> Result<SocketAddr, u8> {
    let data = &data[..ENCODED_LEN];
    let port = u16::from_be_bytes([data[2], data[3]]);
    let ip = match data[0] {
        FAMILY_V4 => IpAddr::V4(Ipv4Addr::new(data[4], data[5], data[6], data[7])),
        FAMILY_V6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[4..20]);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        family => return Err(family),
    };
    Ok(SocketAddr::new(ip, port))
}
