//! Transport-layer dissection
//!
//! TCP, UDP and ICMP(v6) parsing over the captured L4 segment. The payload
//! copy made here is owned by the candidate node and moves with it.

use tracing::info;

use super::cursor::Cursor;
use super::Discard;

const UDP_HDR_LEN: usize = 8;
const TCP_MIN_HDR_LEN: usize = 20;

/// What the L4 parser contributes to the candidate node
#[derive(Debug, Default, PartialEq)]
pub(crate) struct L4Info {
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: u8,
    pub payload: Option<Vec<u8>>,
    /// Replacement byte count, where the protocol redefines it
    pub bytes: Option<u64>,
}

pub(crate) fn tcp(seg: &[u8]) -> Result<L4Info, Discard> {
    let mut cur = Cursor::new(seg);
    let src_port = cur.read_u16().ok_or(Discard::ShortSnap)?;
    let dst_port = cur.read_u16().ok_or(Discard::ShortSnap)?;
    cur.skip(8).ok_or(Discard::ShortSnap)?; // seq, ack
    let off = cur.read_u8().ok_or(Discard::ShortSnap)? >> 4;
    let flags = cur.read_u8().ok_or(Discard::ShortSnap)?;

    let size_tcp = off as usize * 4;
    if size_tcp < TCP_MIN_HDR_LEN {
        info!(data_offset = off, "impossible TCP header length");
        return Err(Discard::ShortSnap);
    }
    if seg.len() < size_tcp {
        info!(
            len = seg.len(),
            header = size_tcp,
            "TCP header exceeds captured segment"
        );
        return Err(Discard::ShortSnap);
    }

    let payload = &seg[size_tcp..];
    Ok(L4Info {
        src_port,
        dst_port,
        flags,
        payload: (!payload.is_empty()).then(|| payload.to_vec()),
        bytes: None,
    })
}

/// `capture_complete` is false when the IP layer clamped the segment; the
/// UDP length consistency check only applies to complete captures.
pub(crate) fn udp(seg: &[u8], capture_complete: bool) -> Result<L4Info, Discard> {
    let mut cur = Cursor::new(seg);
    let src_port = cur.read_u16().ok_or(Discard::ShortSnap)?;
    let dst_port = cur.read_u16().ok_or(Discard::ShortSnap)?;
    let udp_len = cur.read_u16().ok_or(Discard::ShortSnap)? as usize;
    cur.skip(2).ok_or(Discard::ShortSnap)?; // checksum

    if udp_len < UDP_HDR_LEN {
        info!(udp_len, "UDP length field below header size");
        return Err(Discard::ShortSnap);
    }
    if capture_complete && seg.len() - UDP_HDR_LEN < udp_len - UDP_HDR_LEN {
        return Err(Discard::ShortSnap);
    }

    let payload = cur.rest();
    Ok(L4Info {
        src_port,
        dst_port,
        flags: 0,
        payload: (!payload.is_empty()).then(|| payload.to_vec()),
        bytes: Some(payload.len() as u64),
    })
}

/// ICMP type and code are folded into the destination port slot.
pub(crate) fn icmp(seg: &[u8], ip_bytes: u64, v4: bool) -> Result<L4Info, Discard> {
    let mut cur = Cursor::new(seg);
    let icmp_type = cur.read_u8().ok_or(Discard::ShortSnap)?;
    let icmp_code = cur.read_u8().ok_or(Discard::ShortSnap)?;

    Ok(L4Info {
        src_port: 0,
        dst_port: (icmp_type as u16) << 8 | icmp_code as u16,
        flags: 0,
        payload: None,
        bytes: v4.then(|| ip_bytes.saturating_sub(UDP_HDR_LEN as u64)),
    })
}
