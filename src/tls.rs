//! TLS ClientHello parser
//!
//! Walks a TLS handshake record and extracts the fields the fingerprint
//! builder consumes: version, SNI, ALPN, cipher suites, extensions and
//! signature algorithms. GREASE values are filtered out everywhere.
//!
//! The parser is deliberately shallow: it needs one complete ClientHello in
//! the captured payload and gives up (`None`) on anything else.

/// Transport the handshake was observed on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Quic,
}

/// Extracted ClientHello fields
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsHandshake {
    /// Transport tag
    pub transport: Transport,
    /// Negotiated-or-offered TLS version (supported_versions beats legacy)
    pub version: u16,
    /// Server name indication, when offered
    pub sni: Option<String>,
    /// First ALPN protocol, empty when not offered
    pub alpn: String,
    /// Cipher suites as transmitted, GREASE removed
    pub cipher_suites: Vec<u16>,
    /// Extension IDs as transmitted, GREASE removed
    pub extensions: Vec<u16>,
    /// Signature algorithms in their transmitted order, GREASE removed
    pub signature_algorithms: Vec<u16>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::Tcp
    }
}

impl TlsHandshake {
    /// Two-character version code used by the fingerprint
    pub fn version_str(&self) -> &'static str {
        match self.version {
            0x0304 => "13",
            0x0303 => "12",
            0x0302 => "11",
            0x0301 => "10",
            0x0300 => "s3",
            _ => "00",
        }
    }
}

const TLS_RECORD_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;

const EXT_SNI: u16 = 0x0000;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_ALPN: u16 = 0x0010;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;

/// GREASE values per RFC 8701: 0x0a0a, 0x1a1a, ... 0xfafa
fn is_grease(value: u16) -> bool {
    value & 0x0f0f == 0x0a0a
}

fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    Some(((*data.get(pos)? as u16) << 8) | *data.get(pos + 1)? as u16)
}

/// Parse one ClientHello out of a captured handshake payload
pub fn parse_client_hello(data: &[u8], transport: Transport) -> Option<TlsHandshake> {
    if data.len() < 43 {
        return None;
    }
    if data[0] != TLS_RECORD_HANDSHAKE {
        return None;
    }
    let record_len = read_u16(data, 3)? as usize;
    if data.len() < 5 + record_len {
        // split across segments; no reassembly
        return None;
    }

    let handshake = &data[5..];
    if handshake[0] != HANDSHAKE_CLIENT_HELLO {
        return None;
    }

    let hello = &handshake[4..];
    if hello.len() < 38 {
        return None;
    }
    let legacy_version = read_u16(hello, 0)?;

    // random (32 bytes) follows the version
    let mut pos = 34;

    let session_id_len = *hello.get(pos)? as usize;
    pos += 1 + session_id_len;

    let cipher_len = read_u16(hello, pos)? as usize;
    pos += 2;
    if pos + cipher_len > hello.len() {
        return None;
    }
    let mut cipher_suites = Vec::with_capacity(cipher_len / 2);
    let mut i = 0;
    while i + 1 < cipher_len {
        let suite = read_u16(hello, pos + i)?;
        if !is_grease(suite) {
            cipher_suites.push(suite);
        }
        i += 2;
    }
    pos += cipher_len;

    let compression_len = *hello.get(pos)? as usize;
    pos += 1 + compression_len;

    let mut hs = TlsHandshake {
        transport,
        version: legacy_version,
        cipher_suites,
        ..Default::default()
    };

    if pos + 2 > hello.len() {
        // extension-free hello
        return Some(hs);
    }
    let ext_len = read_u16(hello, pos)? as usize;
    pos += 2;
    let ext_end = (pos + ext_len).min(hello.len());

    let mut supported_version: Option<u16> = None;
    while pos + 4 <= ext_end {
        let ext_type = read_u16(hello, pos)?;
        let ext_data_len = read_u16(hello, pos + 2)? as usize;
        pos += 4;

        if !is_grease(ext_type) {
            hs.extensions.push(ext_type);
        }

        if pos + ext_data_len <= ext_end {
            let ext_data = &hello[pos..pos + ext_data_len];
            match ext_type {
                EXT_SNI => hs.sni = parse_sni(ext_data),
                EXT_ALPN => {
                    if let Some(alpn) = parse_alpn(ext_data) {
                        hs.alpn = alpn;
                    }
                }
                EXT_SIGNATURE_ALGORITHMS => {
                    hs.signature_algorithms = parse_u16_list(ext_data);
                }
                EXT_SUPPORTED_VERSIONS => {
                    supported_version = parse_supported_versions(ext_data);
                }
                _ => {}
            }
        }

        pos += ext_data_len;
    }

    if let Some(v) = supported_version {
        hs.version = v;
    }
    Some(hs)
}

/// First host_name entry of the server_name extension
fn parse_sni(data: &[u8]) -> Option<String> {
    if data.len() <= 5 {
        return None;
    }
    let name_len = read_u16(data, 3)? as usize;
    if data.len() < 5 + name_len {
        return None;
    }
    String::from_utf8(data[5..5 + name_len].to_vec()).ok()
}

/// First protocol of the ALPN protocol list
fn parse_alpn(data: &[u8]) -> Option<String> {
    if data.len() < 3 {
        return None;
    }
    let first_len = data[2] as usize;
    if data.len() < 3 + first_len {
        return None;
    }
    String::from_utf8(data[3..3 + first_len].to_vec()).ok()
}

/// u16-length-prefixed list of u16 values, GREASE removed
fn parse_u16_list(data: &[u8]) -> Vec<u16> {
    let mut out = Vec::new();
    let Some(list_len) = read_u16(data, 0) else {
        return out;
    };
    let end = (2 + list_len as usize).min(data.len());
    let mut i = 2;
    while i + 1 < end {
        if let Some(v) = read_u16(data, i) {
            if !is_grease(v) {
                out.push(v);
            }
        }
        i += 2;
    }
    out
}

/// Highest non-GREASE entry of supported_versions
fn parse_supported_versions(data: &[u8]) -> Option<u16> {
    let list_len = *data.first()? as usize;
    let end = (1 + list_len).min(data.len());
    let mut best: Option<u16> = None;
    let mut i = 1;
    while i + 1 < end {
        if let Some(v) = read_u16(data, i) {
            if !is_grease(v) && best.map_or(true, |b| v > b) {
                best = Some(v);
            }
        }
        i += 2;
    }
    best
}
