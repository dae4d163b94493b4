//! LLDP probe frame codec
//!
//! Every probe is an 802.1AB frame sent to the nearest-bridge group address.
//! The switch identity is carried in a locally-assigned Chassis ID of the
//! form `dpid:<16 hex digits>` and the port in a port-component Port ID
//! holding the port number as a big-endian `u32`.
//!
//! ```text
//!  0               6              12    14
//! +---------------+---------------+-----+-----------+---------+-----+-----+
//! | 01:80:c2:00:00:0e | source MAC | 88cc | ChassisID | PortID  | TTL | End |
//! +---------------+---------------+-----+-----------+---------+-----+-----+
//!                                        24 bytes    7 bytes   4     2
//! ```

use crate::error::{DiscoveryError, Result};
use crate::types::{dpid_to_str, str_to_dpid, Dpid, MacAddress, PortNo};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{Cursor, Read};

/// Nearest-bridge multicast address (never forwarded by 802.1D bridges)
pub const LLDP_MAC_NEAREST_BRIDGE: MacAddress = MacAddress([0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e]);

/// LLDP ethertype
pub const ETH_TYPE_LLDP: u16 = 0x88cc;

const ETH_HEADER_LEN: usize = 14;
const TLV_HEADER_LEN: usize = 2;

const TLV_TYPE_CHASSIS_ID: u8 = 1;
const TLV_TYPE_PORT_ID: u8 = 2;
const TLV_TYPE_TTL: u8 = 3;

/// Chassis ID subtype "locally assigned"
pub const CHASSIS_ID_SUB_LOCALLY_ASSIGNED: u8 = 7;
/// Port ID subtype "port component"
pub const PORT_ID_SUB_PORT_COMPONENT: u8 = 2;

/// Prefix of the chassis id string
pub const CHASSIS_ID_PREFIX: &str = "dpid:";

const CHASSIS_ID_VALUE_LEN: usize = 1 + CHASSIS_ID_PREFIX.len() + 16;
const PORT_ID_SIZE: usize = 4;
const PORT_ID_VALUE_LEN: usize = 1 + PORT_ID_SIZE;
const TTL_VALUE_LEN: usize = 2;

/// Length of every probe frame built by [`encode`]. The intercept rule
/// installed on each switch uses this as the controller output `max_len`.
pub const PROBE_FRAME_LEN: usize = ETH_HEADER_LEN
    + TLV_HEADER_LEN
    + CHASSIS_ID_VALUE_LEN
    + TLV_HEADER_LEN
    + PORT_ID_VALUE_LEN
    + TLV_HEADER_LEN
    + TTL_VALUE_LEN
    + TLV_HEADER_LEN;

#[inline]
fn tlv_header(tlv_type: u8, len: usize) -> u16 {
    ((tlv_type as u16) << 9) | (len as u16 & 0x01ff)
}

/// Build the probe frame announcing `(dpid, port_no)`
pub fn encode(dpid: Dpid, port_no: PortNo, src_mac: MacAddress, ttl: u16) -> Vec<u8> {
    let mut frame = vec![0u8; PROBE_FRAME_LEN];

    frame[0..6].copy_from_slice(LLDP_MAC_NEAREST_BRIDGE.octets());
    frame[6..12].copy_from_slice(src_mac.octets());
    BigEndian::write_u16(&mut frame[12..14], ETH_TYPE_LLDP);

    let mut off = ETH_HEADER_LEN;

    BigEndian::write_u16(
        &mut frame[off..],
        tlv_header(TLV_TYPE_CHASSIS_ID, CHASSIS_ID_VALUE_LEN),
    );
    off += TLV_HEADER_LEN;
    frame[off] = CHASSIS_ID_SUB_LOCALLY_ASSIGNED;
    off += 1;
    let chassis_id = format!("{}{}", CHASSIS_ID_PREFIX, dpid_to_str(dpid));
    frame[off..off + chassis_id.len()].copy_from_slice(chassis_id.as_bytes());
    off += chassis_id.len();

    BigEndian::write_u16(
        &mut frame[off..],
        tlv_header(TLV_TYPE_PORT_ID, PORT_ID_VALUE_LEN),
    );
    off += TLV_HEADER_LEN;
    frame[off] = PORT_ID_SUB_PORT_COMPONENT;
    off += 1;
    BigEndian::write_u32(&mut frame[off..], port_no);
    off += PORT_ID_SIZE;

    BigEndian::write_u16(&mut frame[off..], tlv_header(TLV_TYPE_TTL, TTL_VALUE_LEN));
    off += TLV_HEADER_LEN;
    BigEndian::write_u16(&mut frame[off..], ttl);
    off += TTL_VALUE_LEN;

    // End of LLDPDU (type 0, length 0) is left zeroed
    debug_assert_eq!(off + TLV_HEADER_LEN, PROBE_FRAME_LEN);

    frame
}

fn unknown(msg: impl Into<String>) -> DiscoveryError {
    DiscoveryError::UnknownFormat(msg.into())
}

/// Read one TLV, returning its type and value
fn read_tlv(cursor: &mut Cursor<&[u8]>) -> Result<(u8, Vec<u8>)> {
    let header = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| unknown("truncated tlv header"))?;
    let tlv_type = (header >> 9) as u8;
    let len = (header & 0x01ff) as usize;
    let mut value = vec![0u8; len];
    cursor
        .read_exact(&mut value)
        .map_err(|_| unknown(format!("truncated tlv type {} length {}", tlv_type, len)))?;
    Ok((tlv_type, value))
}

/// Extract the announcing `(dpid, port_no)` from a probe frame.
///
/// Any frame that is not one of our probes yields
/// [`DiscoveryError::UnknownFormat`]; this never panics on arbitrary input.
pub fn decode(data: &[u8]) -> Result<(Dpid, PortNo)> {
    if data.len() < ETH_HEADER_LEN {
        return Err(unknown(format!("frame too short ({} bytes)", data.len())));
    }
    let dst = &data[0..6];
    let eth_type = BigEndian::read_u16(&data[12..14]);
    if dst != LLDP_MAC_NEAREST_BRIDGE.octets() || eth_type != ETH_TYPE_LLDP {
        return Err(unknown(format!(
            "unknown dst mac({:02x?}) or type({:#06x})",
            dst, eth_type
        )));
    }

    let mut cursor = Cursor::new(&data[ETH_HEADER_LEN..]);

    let (tlv_type, chassis) = read_tlv(&mut cursor)?;
    if tlv_type != TLV_TYPE_CHASSIS_ID || chassis.is_empty() {
        return Err(unknown(format!("first tlv is not chassis id ({})", tlv_type)));
    }
    if chassis[0] != CHASSIS_ID_SUB_LOCALLY_ASSIGNED {
        return Err(unknown(format!(
            "unknown chassis id subtype {}",
            chassis[0]
        )));
    }
    let chassis_id = std::str::from_utf8(&chassis[1..])
        .map_err(|_| unknown("chassis id is not text"))?;
    let dpid = chassis_id
        .strip_prefix(CHASSIS_ID_PREFIX)
        .and_then(str_to_dpid)
        .ok_or_else(|| unknown(format!("unknown chassis id format {}", chassis_id)))?;

    let (tlv_type, port_id) = read_tlv(&mut cursor)?;
    if tlv_type != TLV_TYPE_PORT_ID || port_id.is_empty() {
        return Err(unknown(format!("second tlv is not port id ({})", tlv_type)));
    }
    if port_id[0] != PORT_ID_SUB_PORT_COMPONENT {
        return Err(unknown(format!("unknown port id subtype {}", port_id[0])));
    }
    let port_id = &port_id[1..];
    if port_id.len() != PORT_ID_SIZE {
        return Err(unknown(format!("unknown port id length {}", port_id.len())));
    }
    let port_no = BigEndian::read_u32(port_id);

    Ok((dpid, port_no))
}
