//! Packet decoding pipeline
//!
//! Drives link, IP and transport parsing over one captured frame and builds
//! the candidate flow node. Tunnels (IPIP, IPv6-in-IP, GRE) restart the IP
//! decode once; the outer addresses are kept as the node's tunnel context.

mod cursor;
mod ip;
mod link;
mod transport;

use tracing::info;

use crate::flow::node::{FlowKey, FlowNode, TunnelInfo, VlanTag};
use crate::ip_proto;
use crate::stats::ProcStat;
use cursor::Cursor;
use transport::L4Info;

/// One level of encapsulation is unwrapped; deeper nesting is dropped.
const MAX_TUNNEL_DEPTH: u8 = 1;

/// Capture link type, fixed per ingress session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkType {
    /// DLT_EN10MB
    Ethernet,
    /// DLT_RAW
    Raw,
    /// Anything else; packets are counted as unknown and dropped
    Unsupported(u16),
}

impl LinkType {
    /// Map a pcap DLT value
    pub fn from_dlt(dlt: u16) -> Self {
        match dlt {
            1 => Self::Ethernet,
            12 | 101 => Self::Raw,
            other => Self::Unsupported(other),
        }
    }
}

/// Capture header handed in by the ingress callback
#[derive(Clone, Copy, Debug)]
pub struct PacketHeader {
    /// Capture timestamp, seconds part
    pub ts_sec: u64,
    /// Capture timestamp, microseconds part
    pub ts_usec: u32,
    /// Bytes actually captured
    pub caplen: u32,
    /// Bytes on the wire
    pub len: u32,
}

impl PacketHeader {
    /// Capture timestamp in microseconds
    pub fn micros(&self) -> u64 {
        self.ts_sec * 1_000_000 + self.ts_usec as u64
    }
}

/// Why a packet left the pipeline without producing a candidate node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Discard {
    ShortSnap,
    Skipped,
    Unknown,
    Fragment,
}

fn count(stats: &mut ProcStat, discard: Discard) {
    match discard {
        Discard::ShortSnap => stats.short_snap += 1,
        Discard::Skipped => stats.skipped += 1,
        Discard::Unknown => stats.unknown += 1,
        Discard::Fragment => stats.frag_dropped += 1,
    }
}

/// Decode one captured frame into a candidate flow node
///
/// Returns `None` when the packet is dropped; the reason is already counted.
pub(crate) fn decode_packet(
    hdr: &PacketHeader,
    data: &[u8],
    link_type: LinkType,
    stats: &mut ProcStat,
) -> Option<FlowNode> {
    let caplen = (hdr.caplen as usize).min(data.len());
    let mut cur = Cursor::new(&data[..caplen]);
    let mut vlan: Option<VlanTag> = None;

    let linked = match link_type {
        LinkType::Ethernet => link::ethernet(&mut cur, &mut vlan),
        LinkType::Raw => Ok(()),
        LinkType::Unsupported(dlt) => {
            info!(link_type = dlt, "unsupported link type");
            stats.unknown += 1;
            return None;
        }
    };
    if let Err(d) = linked {
        count(stats, d);
        return None;
    }

    let mut tun: Option<TunnelInfo> = None;
    let mut depth = 0u8;
    let (ip, seg) = loop {
        let ip = match ip::parse(&mut cur, stats) {
            Ok(ip) => ip,
            Err(d) => {
                count(stats, d);
                return None;
            }
        };
        let seg = match cur.take(ip.payload_len) {
            Some(seg) => seg,
            None => {
                count(stats, Discard::ShortSnap);
                return None;
            }
        };
        match ip.proto {
            ip_proto::IPIP | ip_proto::IPV6 | ip_proto::GRE => {
                if depth >= MAX_TUNNEL_DEPTH {
                    info!(proto = ip.proto, "nested tunnel dropped");
                    count(stats, Discard::Skipped);
                    return None;
                }
                depth += 1;
                tun = Some(TunnelInfo {
                    src_addr: ip.src,
                    dst_addr: ip.dst,
                    version: ip.version,
                    proto: ip.proto,
                });
                cur = Cursor::new(seg);
                if ip.proto == ip_proto::GRE {
                    let entered = gre_enter(&mut cur, &mut vlan);
                    if let Err(d) = entered {
                        count(stats, d);
                        return None;
                    }
                }
            }
            _ => break (ip, seg),
        }
    };

    let capture_complete = ip.bytes == ip.payload_len as u64;
    let l4 = match ip.proto {
        ip_proto::TCP => transport::tcp(seg),
        ip_proto::UDP => transport::udp(seg, capture_complete),
        ip_proto::ICMP => transport::icmp(seg, ip.bytes, true),
        ip_proto::ICMPV6 => transport::icmp(seg, ip.bytes, false),
        _ => Ok(L4Info::default()),
    };
    let l4 = match l4 {
        Ok(l4) => l4,
        Err(d) => {
            count(stats, d);
            return None;
        }
    };

    let key = FlowKey {
        version: ip.version,
        src_addr: ip.src,
        dst_addr: ip.dst,
        src_port: l4.src_port,
        dst_port: l4.dst_port,
        proto: ip.proto,
    };
    let mut node = FlowNode::new(key, hdr.micros());
    node.bytes = l4.bytes.unwrap_or(ip.bytes);
    node.flags = l4.flags;
    node.payload = l4.payload;
    node.vlan = vlan;
    node.tun = tun;
    Some(node)
}

/// Consume a GRE header and resolve the encapsulated ethertype
fn gre_enter(cur: &mut Cursor, vlan: &mut Option<VlanTag>) -> Result<(), Discard> {
    cur.skip(2).ok_or(Discard::ShortSnap)?; // flags
    let ethertype = cur.read_u16().ok_or(Discard::ShortSnap)?;
    link::resolve_ethertype(cur, ethertype, vlan)
}
