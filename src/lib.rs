//! Flowprobe - passive packet-to-flow engine
//!
//! Decodes captured frames (Ethernet/VLAN/MPLS/IPv4/IPv6 plus IPIP and GRE
//! tunnels), aggregates packets into per-flow state with bidirectional
//! linking and handshake latency tracking, and emits completed flow records
//! to a downstream writer. TCP flows carrying a TLS ClientHello additionally
//! yield a compact handshake fingerprint.
//!
//! ## Pipeline
//!
//! - **Decoder**: layered header parsing over a length-checked byte cursor
//! - **Flow table**: insert-or-update keyed by the 5-tuple, idle expiration
//! - **State machine**: per-protocol merge and FIN/RST-driven flushing
//! - **Fingerprint**: deterministic 3-field ClientHello fingerprint
//! - **Output queue**: bounded MPSC channel feeding the writer thread

pub mod config;
pub mod decode;
pub mod engine;
pub mod flow;
pub mod ja4;
pub mod output;
pub mod stats;
pub mod tls;

pub use config::EngineConfig;
pub use engine::{Engine, LinkType, PacketHeader};
pub use flow::node::{FlowKey, FlowNode, NodeState};
pub use ja4::Ja4Record;
pub use output::{OutboundItem, OutputQueue, RecordWriter};
pub use stats::{ProcStat, StatsReport};
pub use tls::{TlsHandshake, Transport};

use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("output queue full")]
    QueueFull,

    #[error("output queue closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("config error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// TCP header flags
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

/// IP protocol numbers the engine dispatches on
pub mod ip_proto {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const IPIP: u8 = 4;
    pub const IPV6: u8 = 41;
    pub const GRE: u8 = 47;
    pub const ICMPV6: u8 = 58;
}
