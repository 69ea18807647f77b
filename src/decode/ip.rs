//! IPv4 / IPv6 header parsing
//!
//! Fragmented IPv4 packets are dropped (no reassembly). IPv6 extension
//! header chains are not walked: the next-header field is taken as the L4
//! protocol, so extension-bearing packets classify as "other".

use tracing::{debug, info};

use super::cursor::Cursor;
use super::Discard;
use crate::flow::node::IpVersion;
use crate::stats::ProcStat;

const IPV4_MF: u16 = 0x2000;
const IPV4_FRAG_OFFSET: u16 = 0x1fff;

const IPV6_HDR_LEN: usize = 40;

#[derive(Debug, PartialEq)]
pub(crate) struct IpHeader {
    pub version: IpVersion,
    pub proto: u8,
    pub src: u128,
    pub dst: u128,
    /// Captured L4 bytes, clamped to the snap length
    pub payload_len: usize,
    /// Byte count credited to the flow
    pub bytes: u64,
}

/// Parse the IP header under the cursor, dispatching on the version nibble
pub(crate) fn parse(cur: &mut Cursor, stats: &mut ProcStat) -> Result<IpHeader, Discard> {
    let data_len = cur.remaining();
    let nibble = cur.peek_u8().ok_or(Discard::ShortSnap)? >> 4;
    match nibble {
        4 => parse_v4(cur, data_len, stats),
        6 => parse_v6(cur, data_len),
        v => {
            info!(version = v, "unsupported IP version");
            Err(Discard::Unknown)
        }
    }
}

fn parse_v4(cur: &mut Cursor, data_len: usize, stats: &mut ProcStat) -> Result<IpHeader, Discard> {
    let vhl = cur.read_u8().ok_or(Discard::ShortSnap)?;
    let ihl = (vhl & 0x0f) as usize;
    if ihl < 5 {
        return Err(Discard::ShortSnap);
    }
    let size_ip = ihl * 4;
    if data_len < size_ip {
        return Err(Discard::ShortSnap);
    }
    cur.skip(1).ok_or(Discard::ShortSnap)?; // tos
    let total_len = cur.read_u16().ok_or(Discard::ShortSnap)? as usize;
    cur.skip(2).ok_or(Discard::ShortSnap)?; // identification
    let ip_off = cur.read_u16().ok_or(Discard::ShortSnap)?;
    cur.skip(1).ok_or(Discard::ShortSnap)?; // ttl
    let proto = cur.read_u8().ok_or(Discard::ShortSnap)?;
    cur.skip(2).ok_or(Discard::ShortSnap)?; // checksum
    let src = cur.take(4).ok_or(Discard::ShortSnap)?;
    let dst = cur.take(4).ok_or(Discard::ShortSnap)?;
    cur.skip(size_ip - 20).ok_or(Discard::ShortSnap)?; // options

    if total_len < size_ip {
        return Err(Discard::ShortSnap);
    }
    let mut payload_len = total_len - size_ip;
    if data_len < payload_len + size_ip {
        // capture length was limited - adapt the payload length
        payload_len = data_len - size_ip;
        stats.short_snap += 1;
    }

    if ip_off & (IPV4_MF | IPV4_FRAG_OFFSET) != 0 {
        debug!(
            frag_offset = (ip_off & IPV4_FRAG_OFFSET) << 3,
            more = ip_off & IPV4_MF != 0,
            "fragmented packet dropped"
        );
        return Err(Discard::Fragment);
    }

    Ok(IpHeader {
        version: IpVersion::V4,
        proto,
        src: u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as u128,
        dst: u32::from_be_bytes([dst[0], dst[1], dst[2], dst[3]]) as u128,
        payload_len,
        bytes: payload_len as u64,
    })
}

fn parse_v6(cur: &mut Cursor, data_len: usize) -> Result<IpHeader, Discard> {
    if data_len < IPV6_HDR_LEN {
        return Err(Discard::ShortSnap);
    }
    cur.skip(4).ok_or(Discard::ShortSnap)?; // version, traffic class, flow label
    let plen = cur.read_u16().ok_or(Discard::ShortSnap)? as usize;
    let proto = cur.read_u8().ok_or(Discard::ShortSnap)?; // next header, not chain-walked
    cur.skip(1).ok_or(Discard::ShortSnap)?; // hop limit
    let src = cur.take(16).ok_or(Discard::ShortSnap)?;
    let dst = cur.take(16).ok_or(Discard::ShortSnap)?;

    let mut payload_len = plen;
    if data_len < payload_len + IPV6_HDR_LEN {
        // capture length was limited - adapt the payload length
        payload_len = data_len - IPV6_HDR_LEN;
    }

    let mut src16 = [0u8; 16];
    let mut dst16 = [0u8; 16];
    src16.copy_from_slice(src);
    dst16.copy_from_slice(dst);

    Ok(IpHeader {
        version: IpVersion::V6,
        proto,
        src: u128::from_be_bytes(src16),
        dst: u128::from_be_bytes(dst16),
        payload_len,
        bytes: plen as u64,
    })
}
