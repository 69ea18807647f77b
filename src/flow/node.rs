//! Flow identity and per-flow state
//!
//! Addresses are 16 octets stored as `u128`; IPv4 lives in the low 4 octets.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::ja4::Ja4Record;
use crate::tcp_flags;

/// IP version of a flow key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

/// 5-tuple flow key; immutable for the life of a flow node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    /// IP version
    pub version: IpVersion,
    /// Source address (v4 stored in the low 4 octets)
    pub src_addr: u128,
    /// Destination address
    pub dst_addr: u128,
    /// Source port
    pub src_port: u16,
    /// Destination port (ICMP type/code for ICMP flows)
    pub dst_port: u16,
    /// IP protocol
    pub proto: u8,
}

impl FlowKey {
    /// Create from an IPv4 tuple
    pub const fn from_v4(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        proto: u8,
    ) -> Self {
        Self {
            version: IpVersion::V4,
            src_addr: u32::from_be_bytes(src.octets()) as u128,
            dst_addr: u32::from_be_bytes(dst.octets()) as u128,
            src_port,
            dst_port,
            proto,
        }
    }

    /// Create from an IPv6 tuple
    pub const fn from_v6(
        src: Ipv6Addr,
        dst: Ipv6Addr,
        src_port: u16,
        dst_port: u16,
        proto: u8,
    ) -> Self {
        Self {
            version: IpVersion::V6,
            src_addr: u128::from_be_bytes(src.octets()),
            dst_addr: u128::from_be_bytes(dst.octets()),
            src_port,
            dst_port,
            proto,
        }
    }

    /// Key of the opposite direction
    pub const fn reverse(&self) -> Self {
        Self {
            version: self.version,
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            src_port: self.dst_port,
            dst_port: self.src_port,
            proto: self.proto,
        }
    }

    /// Source address as a std IP address
    pub fn src_ip(&self) -> IpAddr {
        Self::to_ip(self.version, self.src_addr)
    }

    /// Destination address as a std IP address
    pub fn dst_ip(&self) -> IpAddr {
        Self::to_ip(self.version, self.dst_addr)
    }

    fn to_ip(version: IpVersion, addr: u128) -> IpAddr {
        match version {
            IpVersion::V4 => IpAddr::V4(Ipv4Addr::from(addr as u32)),
            IpVersion::V6 => IpAddr::V6(Ipv6Addr::from(addr)),
        }
    }
}

/// 802.1Q tag control information of the outermost tag seen
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanTag {
    /// Raw TCI field
    pub tci: u16,
}

impl VlanTag {
    /// VLAN identifier
    pub fn id(&self) -> u16 {
        self.tci & 0x0fff
    }

    /// Priority code point
    pub fn pcp(&self) -> u8 {
        (self.tci >> 13) as u8
    }
}

/// Outer addresses of an unwrapped tunnel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelInfo {
    pub src_addr: u128,
    pub dst_addr: u128,
    pub version: IpVersion,
    /// Tunnel protocol (4 = IPIP, 41 = IPv6-in-IP, 47 = GRE)
    pub proto: u8,
}

/// Handshake latency slots, microseconds; each is set at most once
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latency {
    /// SYN to SYN+ACK
    pub server_us: u64,
    /// SYN+ACK to first client ACK
    pub client_us: u64,
    /// Client ACK to first data packet
    pub application_us: u64,
    /// Handshake progress: 0 none, 1 server seen, 2 ack seen, 3 complete
    pub(crate) phase: u8,
    /// Timestamp of the last phase transition
    pub(crate) mark_us: u64,
}

/// Node lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Owned by the flow table and reachable by its key
    InUse,
    /// Handed to the output queue
    Flushed,
    /// Consumed by the writer
    Freed,
}

/// Per-flow state, exclusively owned by the flow table while in use
#[derive(Clone, Debug)]
pub struct FlowNode {
    key: FlowKey,
    /// Packets observed
    pub packets: u32,
    /// Bytes observed (header-stripped where the protocol defines it)
    pub bytes: u64,
    /// First observation, microseconds
    pub t_first: u64,
    /// Last observation, microseconds
    pub t_last: u64,
    /// Union of observed TCP flags
    pub flags: u8,
    /// Outermost VLAN tag
    pub vlan: Option<VlanTag>,
    /// Tunnel context when the packet was encapsulated
    pub tun: Option<TunnelInfo>,
    /// First captured application payload
    pub payload: Option<Vec<u8>>,
    /// Handshake latency slots
    pub latency: Latency,
    /// Non-owning reference to the peer flow of the opposite direction
    pub reverse: Option<FlowKey>,
    /// Lifecycle state
    pub state: NodeState,
    /// ClientHello fingerprint, attached at flush
    pub fingerprint: Option<Ja4Record>,
}

impl FlowNode {
    /// New candidate node for a packet observed at `ts_us`
    pub fn new(key: FlowKey, ts_us: u64) -> Self {
        Self {
            key,
            packets: 1,
            bytes: 0,
            t_first: ts_us,
            t_last: ts_us,
            flags: 0,
            vlan: None,
            tun: None,
            payload: None,
            latency: Latency::default(),
            reverse: None,
            state: NodeState::InUse,
            fingerprint: None,
        }
    }

    /// Flow identity
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// FIN or RST observed
    pub fn is_fin_rst(&self) -> bool {
        self.flags & (tcp_flags::FIN | tcp_flags::RST) != 0
    }
}
