//! Link-layer demux
//!
//! Ethernet, stacked 802.1Q tags and MPLS label stacks down to an IP payload.
//! GRE re-enters the same ethertype evaluation for its inner protocol.

use tracing::{debug, info};

use super::cursor::Cursor;
use super::Discard;
use crate::flow::node::VlanTag;

pub(crate) const ETH_IP4: u16 = 0x0800;
pub(crate) const ETH_IP6: u16 = 0x86DD;
pub(crate) const ETH_VLAN: u16 = 0x8100;
pub(crate) const ETH_MPLS: u16 = 0x8847;

/// Parse an Ethernet header and resolve its ethertype down to IP
pub(crate) fn ethernet(cur: &mut Cursor, vlan: &mut Option<VlanTag>) -> Result<(), Discard> {
    cur.skip(12).ok_or(Discard::ShortSnap)?;
    let ethertype = cur.read_u16().ok_or(Discard::ShortSnap)?;
    if ethertype <= 1500 {
        // IEEE 802.3 LLC frame
        return Err(Discard::Skipped);
    }
    resolve_ethertype(cur, ethertype, vlan)
}

/// Walk VLAN and MPLS encapsulation until the cursor sits on an IP header
///
/// Only the first VLAN tag seen for the whole frame is recorded.
pub(crate) fn resolve_ethertype(
    cur: &mut Cursor,
    mut ethertype: u16,
    vlan: &mut Option<VlanTag>,
) -> Result<(), Discard> {
    loop {
        match ethertype {
            ETH_IP4 | ETH_IP6 => return Ok(()),
            ETH_VLAN => {
                while ethertype == ETH_VLAN {
                    let tci = cur.read_u16().ok_or(Discard::ShortSnap)?;
                    ethertype = cur.read_u16().ok_or(Discard::ShortSnap)?;
                    debug!(vlan_id = tci & 0x0fff, ethertype, "VLAN tag");
                    if vlan.is_none() {
                        *vlan = Some(VlanTag { tci });
                    }
                }
            }
            ETH_MPLS => {
                // unwind the label stack to the bottom-of-stack entry
                loop {
                    let entry = cur.read_u32().ok_or(Discard::ShortSnap)?;
                    debug!(label = entry >> 12, "MPLS label");
                    if entry & 0x100 != 0 {
                        break;
                    }
                }
                let nibble = cur.peek_u8().ok_or(Discard::ShortSnap)? >> 4;
                ethertype = match nibble {
                    4 => ETH_IP4,
                    6 => ETH_IP6,
                    _ => {
                        info!(version = nibble, "unsupported protocol under MPLS");
                        return Err(Discard::Unknown);
                    }
                };
            }
            _ => return Err(Discard::Skipped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_frame(ethertype: u16, tail: &[u8]) -> Vec<u8> {
        let mut f = vec![0u8; 12];
        f.extend_from_slice(&ethertype.to_be_bytes());
        f.extend_from_slice(tail);
        f
    }

    #[test]
    fn test_plain_ipv4_ethertype() {
        let frame = eth_frame(ETH_IP4, &[0x45]);
        let mut cur = Cursor::new(&frame);
        let mut vlan = None;
        assert!(ethernet(&mut cur, &mut vlan).is_ok());
        assert_eq!(cur.peek_u8(), Some(0x45));
        assert!(vlan.is_none());
    }

    #[test]
    fn test_ieee_802_3_is_skipped() {
        let frame = eth_frame(0x0100, &[]);
        let mut cur = Cursor::new(&frame);
        let mut vlan = None;
        assert_eq!(ethernet(&mut cur, &mut vlan), Err(Discard::Skipped));
    }

    #[test]
    fn test_stacked_vlan_records_first_tag() {
        // VLAN 100 wrapping VLAN 200 wrapping IPv4
        let mut tail = Vec::new();
        tail.extend_from_slice(&100u16.to_be_bytes());
        tail.extend_from_slice(&ETH_VLAN.to_be_bytes());
        tail.extend_from_slice(&200u16.to_be_bytes());
        tail.extend_from_slice(&ETH_IP4.to_be_bytes());
        tail.push(0x45);
        let frame = eth_frame(ETH_VLAN, &tail);
        let mut cur = Cursor::new(&frame);
        let mut vlan = None;
        assert!(ethernet(&mut cur, &mut vlan).is_ok());
        assert_eq!(vlan.map(|v| v.id()), Some(100));
        assert_eq!(cur.peek_u8(), Some(0x45));
    }

    #[test]
    fn test_mpls_bottom_of_stack_to_ipv6() {
        // two labels, second carries the S bit, then an IPv6 version nibble
        let mut tail = Vec::new();
        tail.extend_from_slice(&0x0001_0040u32.to_be_bytes());
        tail.extend_from_slice(&0x0002_0140u32.to_be_bytes());
        tail.push(0x60);
        let frame = eth_frame(ETH_MPLS, &tail);
        let mut cur = Cursor::new(&frame);
        let mut vlan = None;
        assert!(ethernet(&mut cur, &mut vlan).is_ok());
        assert_eq!(cur.peek_u8(), Some(0x60));
    }

    #[test]
    fn test_mpls_unknown_payload() {
        let mut tail = Vec::new();
        tail.extend_from_slice(&0x0001_0140u32.to_be_bytes());
        tail.push(0x20);
        let frame = eth_frame(ETH_MPLS, &tail);
        let mut cur = Cursor::new(&frame);
        let mut vlan = None;
        assert_eq!(ethernet(&mut cur, &mut vlan), Err(Discard::Unknown));
    }

    #[test]
    fn test_truncated_vlan_is_short_snap() {
        let frame = eth_frame(ETH_VLAN, &[0x00]);
        let mut cur = Cursor::new(&frame);
        let mut vlan = None;
        assert_eq!(ethernet(&mut cur, &mut vlan), Err(Discard::ShortSnap));
    }

    #[test]
    fn test_unhandled_ethertype_is_skipped() {
        let frame = eth_frame(0x0806, &[]); // ARP
        let mut cur = Cursor::new(&frame);
        let mut vlan = None;
        assert_eq!(ethernet(&mut cur, &mut vlan), Err(Discard::Skipped));
    }
}
