//! Self-delimiting encoding of packet inter-arrival distances.
//!
//! Distances up to 0x7F take one byte. Larger ones use the UTF-8 layout:
//! the count of leading set bits of the first byte is the total length
//! (2 to 6 bytes) and every continuation byte is `10xxxxxx`. Six bytes hold
//! 31 payload bits. Anything larger collapses to the one-byte sentinel
//! `0xFF`, which keeps the occurrence but loses the value.

use bytes::BufMut;

use crate::error::TsError;

pub const OVERFLOW: u8 = 0xFF;
pub const MAX_DISTANCE: u64 = (1 << 31) - 1;
pub const MAX_ENCODED_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Value(u32),
    Overflow,
}

/// Payload bits carried by an `n`-byte sequence (n ≥ 2).
const fn capacity_bits(n: usize) -> u32 {
    (5 * n + 1) as u32
}

/// Encoded length of `distance`.
pub fn encoded_len(distance: u64) -> usize {
    if distance <= 0x7F || distance > MAX_DISTANCE {
        return 1;
    }
    (2..=MAX_ENCODED_LEN)
        .find(|&n| distance < 1u64 << capacity_bits(n))
        .unwrap_or(MAX_ENCODED_LEN)
}

/// Appends `distance` to `out`, returning the number of bytes written.
pub fn encode<B: BufMut>(distance: u64, out: &mut B) -> usize {
    if distance <= 0x7F {
        out.put_u8(distance as u8);
        return 1;
    }
    if distance > MAX_DISTANCE {
        out.put_u8(OVERFLOW);
        return 1;
    }
    let n = encoded_len(distance);
    let marker = !(0xFFu8 >> n);
    out.put_u8(marker | (distance >> (6 * (n - 1))) as u8);
    for i in (0..n - 1).rev() {
        out.put_u8(0x80 | ((distance >> (6 * i)) & 0x3F) as u8);
    }
    n
}

pub fn encode_to_vec(distance: u64) -> Vec<u8> {
    let mut v = Vec::with_capacity(MAX_ENCODED_LEN);
    encode(distance, &mut v);
    v
}

/// Decodes the distance at the start of `bytes`, returning it together with
/// the number of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(Distance, usize), TsError> {
    let Some(&lead) = bytes.first() else {
        return Err(TsError::DistanceTruncated { needed: 1, available: 0 });
    };
    if lead < 0x80 {
        return Ok((Distance::Value(lead as u32), 1));
    }
    if lead == OVERFLOW {
        return Ok((Distance::Overflow, 1));
    }
    let n = lead.leading_ones() as usize;
    if !(2..=MAX_ENCODED_LEN).contains(&n) {
        return Err(TsError::DistanceLead(lead));
    }
    if bytes.len() < n {
        return Err(TsError::DistanceTruncated { needed: n, available: bytes.len() });
    }
    let mut value = (lead & (0x7F >> n)) as u32;
    for &b in &bytes[1..n] {
        if b & 0xC0 != 0x80 {
            return Err(TsError::DistanceLead(b));
        }
        value = (value << 6) | (b & 0x3F) as u32;
    }
    Ok((Distance::Value(value), n))
}

/// Walks an encoded batch. Stops after the first decode error.
pub struct DistanceIter<'a> {
    data: &'a [u8],
}

impl<'a> DistanceIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl Iterator for DistanceIter<'_> {
    type Item = Result<Distance, TsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        match decode(self.data) {
            Ok((d, used)) => {
                self.data = &self.data[used..];
                Some(Ok(d))
            }
            Err(e) => {
                self.data = &[];
                Some(Err(e))
            }
        }
    }
}
