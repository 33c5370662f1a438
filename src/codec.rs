//! Store Key Codec
//!
//! The bundled backends never store the raw address text as the key. They
//! store a composite key that frames a 16-byte blob:
//!
//! ```text
//! <namespace>:<set>::<b0> <b1> ... <b15>
//! ```
//!
//! Each `bN` is one byte as two lowercase hex digits. For an IPv4 user key
//! the blob is its IPv4-mapped IPv6 form (`00 x10, ff ff, a b c d`), so the
//! address lives at bytes 12..16. Any other user key gets a 16-byte FNV-1a
//! digest of its text, which keeps it distinct but decodes to a pseudo
//! address.
//!
//! Decoding works on the key text only:
//!
//! 1. find `::` followed by a run of hex pairs (each pair optionally followed
//!    by one whitespace character)
//! 2. strip spaces from the run
//! 3. hex-decode it
//! 4. require at least 16 bytes
//! 5. render bytes 12..16 as dotted decimal
//!
//! The 12..16 offset is a property of this key format. A different backend
//! must derive its own.

use crate::error::{Error, ErrorKind, Result};
use std::net::Ipv4Addr;

/// Marker between the namespace/set framing and the hex blob.
pub const DELIMITER: &str = "::";

/// Minimum number of decoded bytes for an address to be present.
pub const BLOB_LEN: usize = 16;

/// Byte range of the IPv4 octets inside the blob.
const IPV4_OFFSET: std::ops::Range<usize> = 12..16;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Decodes the IPv4 address embedded in an opaque store key.
///
/// # Example
///
/// ```
/// use ipcounter::codec;
///
/// let key = "ns:set::00 00 00 00 00 00 00 00 00 00 ff ff c0 a8 01 01";
/// assert_eq!(codec::decode(key).unwrap(), "192.168.1.1");
/// ```
pub fn decode(key: &str) -> Result<String> {
    let run = extract_hex_run(key)?;
    hex_to_ipv4(run)
}

/// Captures the run of hex pairs following the first usable `::` marker.
///
/// The run is returned verbatim, separators included.
pub fn extract_hex_run(input: &str) -> Result<&str> {
    let bytes = input.as_bytes();
    let mut from = 0;

    while let Some(pos) = input[from..].find(DELIMITER) {
        let start = from + pos + DELIMITER.len();
        let end = scan_hex_pairs(bytes, start);
        if end > start {
            return Ok(&input[start..end]);
        }
        // Overlapping markers like ":::" are tried one byte further on
        from += pos + 1;
    }

    Err(Error::new(ErrorKind::NoHexIpFound))
}

/// Returns the end of the hex-pair run starting at `start`.
fn scan_hex_pairs(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i + 1 < bytes.len() && is_lower_hex(bytes[i]) && is_lower_hex(bytes[i + 1]) {
        i += 2;
        if i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
    }
    i
}

#[inline]
fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

/// Converts a (possibly space-separated) hex run into an IPv4 address string.
pub fn hex_to_ipv4(input: &str) -> Result<String> {
    let compact = input.replace(' ', "");
    let bytes = decode_hex(&compact)?;

    if bytes.len() < BLOB_LEN {
        return Err(Error::new(ErrorKind::InvalidIpv4Length));
    }

    let octets: [u8; 4] = bytes[IPV4_OFFSET]
        .try_into()
        .map_err(|_| Error::new(ErrorKind::InvalidIpv4Length))?;
    let ip = Ipv4Addr::from(octets).to_string();
    if ip.is_empty() {
        return Err(Error::new(ErrorKind::CannotConvertHexToIp));
    }

    Ok(ip)
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let digits = s.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(Error::with_source(
            ErrorKind::DecodingHexFailed,
            format!("odd length hex string: {}", digits.len()),
        ));
    }

    digits
        .chunks_exact(2)
        .map(|pair| -> Result<u8> { Ok((hex_value(pair[0])? << 4) | hex_value(pair[1])?) })
        .collect()
}

fn hex_value(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::with_source(
            ErrorKind::DecodingHexFailed,
            format!("invalid hex digit: {:?}", c as char),
        )),
    }
}

/// Builds the composite store key for `key` inside `namespace`/`set`.
///
/// Namespace and set must be non-empty ASCII alphanumerics, `_`, `-` or `.`
/// so that the `::` marker and glob scans stay unambiguous.
pub fn encode(namespace: &str, set: &str, key: &str) -> Result<String> {
    let prefix = set_prefix(namespace, set)?;
    let blob = key_blob(key);

    let mut out = String::with_capacity(prefix.len() + BLOB_LEN * 3);
    out.push_str(&prefix);
    for (i, b) in blob.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(hex_digit(b >> 4));
        out.push(hex_digit(b & 0x0f));
    }
    Ok(out)
}

/// Returns `<namespace>:<set>::`, the prefix shared by every key of a set.
pub fn set_prefix(namespace: &str, set: &str) -> Result<String> {
    validate_name(namespace)?;
    validate_name(set)?;
    Ok(format!("{}:{}{}", namespace, set, DELIMITER))
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(Error::with_source(
            ErrorKind::InvalidKey,
            format!("invalid namespace or set name: {:?}", name),
        ))
    }
}

/// The 16-byte blob stored for a user key.
fn key_blob(key: &str) -> [u8; BLOB_LEN] {
    match key.parse::<Ipv4Addr>() {
        Ok(ip) => ip.to_ipv6_mapped().octets(),
        Err(_) => digest(key.as_bytes()),
    }
}

/// Two chained FNV-1a passes, 128 bits in total.
fn digest(data: &[u8]) -> [u8; BLOB_LEN] {
    let high = fnv1a(FNV_OFFSET_BASIS, data);
    let low = fnv1a(high, data);

    let mut out = [0u8; BLOB_LEN];
    out[..8].copy_from_slice(&high.to_be_bytes());
    out[8..].copy_from_slice(&low.to_be_bytes());
    out
}

fn fnv1a(seed: u64, data: &[u8]) -> u64 {
    data.iter().fold(seed, |hash, &b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

#[inline]
fn hex_digit(nibble: u8) -> char {
    char::from_digit(u32::from(nibble), 16).unwrap_or('0')
}
