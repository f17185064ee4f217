// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bit-addressed memory helpers.
//!
//! Tag memory is addressed MSB-first: bit 0 is the most significant bit of
//! byte 0. Gen2 writes operate on 16-bit words, so most callers round their
//! windows out with [`word_floor`] / [`word_ceil`].

use serde::{Deserialize, Serialize};

/// Number of bits in a tag memory word.
pub const WORD_BITS: u16 = 16;

/// Round a bit offset down to the enclosing word boundary.
#[inline]
pub fn word_floor(bits: u16) -> u16 {
    bits - bits % WORD_BITS
}

/// Last word boundary representable as a bit offset.
pub const MAX_WORD_END: u16 = u16::MAX - u16::MAX % WORD_BITS;

/// Round a bit offset up to the next word boundary, saturating at
/// [`MAX_WORD_END`].
#[inline]
pub fn word_ceil(bits: u16) -> u16 {
    let word = u32::from(WORD_BITS);
    u16::try_from(u32::from(bits).div_ceil(word) * word).unwrap_or(MAX_WORD_END)
}

/// Whether `offset + length` bits, rounded out to whole words, stay
/// addressable.
#[inline]
pub fn fits_words(offset: u16, length: u16) -> bool {
    let word = u32::from(WORD_BITS);
    (u32::from(offset) + u32::from(length)).div_ceil(word) * word <= u32::from(MAX_WORD_END)
}

/// Number of bytes needed to hold `bits` bits.
#[inline]
pub fn byte_len(bits: u16) -> usize {
    usize::from(bits).div_ceil(8)
}

/// Read the bit at `index` (MSB-first). Out of range reads as `false`.
#[inline]
pub fn get_bit(data: &[u8], index: usize) -> bool {
    data.get(index / 8)
        .map(|b| b & (0x80 >> (index % 8)) != 0)
        .unwrap_or(false)
}

/// Set the bit at `index` (MSB-first). Out of range writes are ignored.
#[inline]
pub fn set_bit(data: &mut [u8], index: usize, value: bool) {
    if let Some(b) = data.get_mut(index / 8) {
        let mask = 0x80 >> (index % 8);
        if value {
            *b |= mask;
        } else {
            *b &= !mask;
        }
    }
}

/// Copy `length` bits starting at `offset` into a new left-aligned buffer.
pub fn extract(data: &[u8], offset: usize, length: u16) -> Bytes {
    let mut out = vec![0u8; byte_len(length)];
    for i in 0..usize::from(length) {
        set_bit(&mut out, i, get_bit(data, offset + i));
    }
    Bytes::new(out, length)
}

/// Overwrite `value.length()` bits of `image` starting at bit `offset`.
pub fn place(image: &mut [u8], offset: usize, value: &Bytes) {
    for i in 0..usize::from(value.length()) {
        set_bit(image, offset + i, get_bit(value.data(), i));
    }
}

/// Zero `length` bits of `image` starting at bit `offset`.
pub fn clear(image: &mut [u8], offset: usize, length: u16) {
    for i in 0..usize::from(length) {
        set_bit(image, offset + i, false);
    }
}

/// Encode bytes as upper-case hex.
pub fn to_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Byte payload with an explicit bit length.
///
/// Bits are left-aligned: the payload occupies the first `length` bits of
/// `data`, trailing bits of the last byte are zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bytes {
    data: Vec<u8>,
    length: u16,
}

impl Bytes {
    /// Create a payload, truncating or zero-extending `data` to `length` bits.
    pub fn new(mut data: Vec<u8>, length: u16) -> Self {
        data.resize(byte_len(length), 0);
        let tail = usize::from(length) % 8;
        if tail != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xFFu8 << (8 - tail);
            }
        }
        Self { data, length }
    }

    /// Payload covering whole bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let length = (data.len() * 8) as u16;
        Self { data, length }
    }

    /// Right-aligned unsigned value stored in exactly `length` bits.
    ///
    /// Returns `None` when the value does not fit.
    pub fn from_uint(value: u128, length: u16) -> Option<Self> {
        if length < 128 && value >> length != 0 {
            return None;
        }
        let mut data = vec![0u8; byte_len(length)];
        for i in 0..usize::from(length) {
            let shift = usize::from(length) - 1 - i;
            let bit = shift < 128 && (value >> shift) & 1 == 1;
            set_bit(&mut data, i, bit);
        }
        Some(Self { data, length })
    }

    /// Parse a hex string (optionally `x`-prefixed) into a payload of
    /// `4 * digits` bits.
    pub fn from_hex(text: &str) -> Option<Self> {
        let digits = text.strip_prefix('x').unwrap_or(text);
        if digits.is_empty() || digits.len() > usize::from(u16::MAX) / 4 {
            return None;
        }
        let length = (digits.len() * 4) as u16;
        let padded = if digits.len() % 2 == 1 {
            format!("{}0", digits)
        } else {
            digits.to_string()
        };
        let data = hex::decode(padded).ok()?;
        Some(Self::new(data, length))
    }

    /// Raw bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length in bits.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Whether the payload holds no bits.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Interpret the payload as an unsigned big-endian value.
    ///
    /// Returns `None` for payloads wider than 128 bits.
    pub fn to_uint(&self) -> Option<u128> {
        if self.length > 128 {
            return None;
        }
        let mut value = 0u128;
        for i in 0..usize::from(self.length) {
            value = (value << 1) | u128::from(get_bit(&self.data, i));
        }
        Some(value)
    }

    /// Minimal number of bits needed for the unsigned value, ignoring
    /// leading zero bits.
    pub fn significant_bits(&self) -> u16 {
        (0..usize::from(self.length))
            .find(|&i| get_bit(&self.data, i))
            .map(|first| self.length - first as u16)
            .unwrap_or(0)
    }

    /// Hex rendering of the payload bytes.
    pub fn to_hex(&self) -> String {
        to_hex(&self.data)
    }

    /// True when every bit is zero.
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }
}
