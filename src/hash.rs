//! Interleaved-bit geohash keys.
//!
//! A [`GeoHash`] packs up to 32 bits per axis into a single `u64`, most
//! significant bit first, with x bits at even positions and y bits at odd
//! positions. Comparing raw hashes as unsigned integers walks the Z-order
//! curve, which is what lets a sorted index serve as a spatial index.

use crate::error::{GeoError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum bits per axis.
pub const MAX_BITS: u32 = 32;

const fn mask64_for(pos: u32) -> u64 {
    1u64 << (63 - pos)
}

const fn mask32_for(pos: u32) -> u32 {
    1u32 << (31 - pos)
}

/// Mask of the x lane over the first `bits` bit pairs.
const fn all_x(bits: u32) -> u64 {
    let mut mask = 0u64;
    let mut i = 0;
    while i < bits {
        mask |= mask64_for(i * 2);
        i += 1;
    }
    mask
}

const fn all_y(bits: u32) -> u64 {
    all_x(bits) >> 1
}

/// A hash cell: the interleaved bits plus the number of bit pairs in use.
///
/// Level 0 has no bits and covers the whole domain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GeoHash {
    hash: u64,
    bits: u32,
}

impl GeoHash {
    /// The unconstrained root cell.
    pub const fn new() -> Self {
        Self { hash: 0, bits: 0 }
    }

    /// Build a hash from raw interleaved bits, clearing anything past `bits`.
    pub fn from_raw(hash: u64, bits: u32) -> Self {
        debug_assert!(bits <= MAX_BITS);
        let mut h = Self {
            hash,
            bits: bits.min(MAX_BITS),
        };
        h.clear_unused_bits();
        h
    }

    /// Interleave two scaled coordinates, keeping their top `bits` bits.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geo2d::GeoHash;
    ///
    /// let h = GeoHash::from_coords(0, 1, 32);
    /// assert_eq!(h.hash(), 1);
    /// assert_eq!(h.unhash(), (0, 1));
    /// ```
    pub fn from_coords(x: u32, y: u32, bits: u32) -> Self {
        let bits = bits.min(MAX_BITS);
        let mut hash = 0u64;
        for i in 0..bits {
            if x & mask32_for(i) != 0 {
                hash |= mask64_for(i * 2);
            }
            if y & mask32_for(i) != 0 {
                hash |= mask64_for(i * 2 + 1);
            }
        }
        Self { hash, bits }
    }

    /// Split the hash back into its scaled x and y lanes.
    pub fn unhash(&self) -> (u32, u32) {
        let mut x = 0u32;
        let mut y = 0u32;
        for i in 0..self.bits {
            if self.bit(i * 2) {
                x |= mask32_for(i);
            }
            if self.bit(i * 2 + 1) {
                y |= mask32_for(i);
            }
        }
        (x, y)
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// True unless this is the level 0 root.
    pub fn constrains(&self) -> bool {
        self.bits > 0
    }

    pub fn can_refine(&self) -> bool {
        self.bits < MAX_BITS
    }

    /// Smallest full-precision hash inside this cell.
    pub fn hash_min(&self) -> u64 {
        self.hash
    }

    /// Largest full-precision hash inside this cell.
    pub fn hash_max(&self) -> u64 {
        self.hash | !(all_x(self.bits) | all_y(self.bits))
    }

    /// Whether this hash lies inside the cell `prefix`.
    pub fn has_prefix(&self, prefix: &GeoHash) -> bool {
        if prefix.bits > self.bits {
            return false;
        }
        if prefix.bits == 0 {
            return true;
        }
        let diff = prefix.hash ^ self.hash;
        (diff >> (64 - prefix.bits * 2)) == 0
    }

    /// Longest prefix shared with `other`, counted in whole bit pairs.
    pub fn common_prefix(&self, other: &GeoHash) -> GeoHash {
        let mut i = 0;
        while i < self.bits && i < other.bits {
            if self.bit(i * 2) != other.bit(i * 2) || self.bit(i * 2 + 1) != other.bit(i * 2 + 1) {
                break;
            }
            i += 1;
        }
        GeoHash::from_raw(self.hash, i)
    }

    /// The parent cell. The root is its own parent.
    pub fn up(&self) -> GeoHash {
        if self.bits == 0 {
            return *self;
        }
        GeoHash::from_raw(self.hash, self.bits - 1)
    }

    /// The four children, in `00`, `01`, `10`, `11` order.
    pub fn subdivide(&self) -> [GeoHash; 4] {
        debug_assert!(self.can_refine());
        let bits = self.bits + 1;
        let x = mask64_for(self.bits * 2);
        let y = mask64_for(self.bits * 2 + 1);
        [
            GeoHash { hash: self.hash, bits },
            GeoHash { hash: self.hash | y, bits },
            GeoHash { hash: self.hash | x, bits },
            GeoHash { hash: self.hash | x | y, bits },
        ]
    }

    /// Append the bits of `suffix` below this cell.
    ///
    /// ```rust
    /// use geo2d::GeoHash;
    ///
    /// let a: GeoHash = "1010".parse().unwrap();
    /// let b: GeoHash = "01".parse().unwrap();
    /// assert_eq!(a.concat(&b).to_string(), "101001");
    /// ```
    pub fn concat(&self, suffix: &GeoHash) -> GeoHash {
        if suffix.bits == 0 || !self.can_refine() {
            return *self;
        }
        let shifted = if self.bits == 0 {
            suffix.hash
        } else {
            suffix.hash >> (self.bits * 2)
        };
        GeoHash::from_raw(self.hash | shifted, self.bits + suffix.bits)
    }

    /// Translate by one cell along each axis, wrapping at the level's width.
    ///
    /// `dx` and `dy` must each be -1, 0 or 1.
    pub fn move_by(&mut self, dx: i32, dy: i32) {
        debug_assert!(self.bits > 0);
        if self.bits == 0 {
            return;
        }
        self.move_lane(0, dx);
        self.move_lane(1, dy);
    }

    fn move_lane(&mut self, offset: u32, d: i32) {
        if d == 0 {
            return;
        }
        debug_assert!((-1..=1).contains(&d));

        // Adding flips trailing ones to zero until a zero is found; subtracting is the mirror.
        let (from, to) = if d > 0 { (false, true) } else { (true, false) };

        let mut pos = self.bits * 2 - 1;
        if offset == 0 {
            pos -= 1;
        }

        loop {
            if self.bit(pos) == from {
                self.set_bit(pos, to);
                return;
            }

            if pos < 2 {
                // overflow
                while pos < self.bits * 2 {
                    self.set_bit(pos, from);
                    pos += 2;
                }
                return;
            }

            self.set_bit(pos, from);
            pos -= 2;
        }
    }

    pub fn at_min_x(&self) -> bool {
        self.hash & all_x(self.bits) == 0
    }

    pub fn at_min_y(&self) -> bool {
        self.hash & all_y(self.bits) == 0
    }

    pub fn at_max_x(&self) -> bool {
        let mask = all_x(self.bits);
        self.hash & mask == mask
    }

    pub fn at_max_y(&self) -> bool {
        let mask = all_y(self.bits);
        self.hash & mask == mask
    }

    /// Big-endian key bytes, ordered the same way as the hash.
    pub fn to_key(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u64(self.hash);
        buf.freeze()
    }

    /// Decode key bytes produced by [`GeoHash::to_key`] at the given level.
    pub fn from_key(mut key: &[u8], bits: u32) -> Result<Self> {
        if key.len() != 8 {
            return Err(GeoError::BadQuery(format!(
                "geo key must be 8 bytes, got {}",
                key.len()
            )));
        }
        if bits > MAX_BITS {
            return Err(GeoError::BadQuery(format!("too many bits in geo key: {}", bits)));
        }
        Ok(GeoHash::from_raw(key.get_u64(), bits))
    }

    fn bit(&self, pos: u32) -> bool {
        self.hash & mask64_for(pos) != 0
    }

    fn set_bit(&mut self, pos: u32, value: bool) {
        if value {
            self.hash |= mask64_for(pos);
        } else {
            self.hash &= !mask64_for(pos);
        }
    }

    fn clear_unused_bits(&mut self) {
        if self.bits == 0 {
            self.hash = 0;
        } else if self.bits < MAX_BITS {
            let keep = u64::MAX << (64 - self.bits * 2);
            self.hash &= keep;
        }
    }
}

impl fmt::Display for GeoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pos in 0..self.bits * 2 {
            f.write_str(if self.bit(pos) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for GeoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GeoHash").field(&self.to_string()).finish()
    }
}

impl FromStr for GeoHash {
    type Err = GeoError;

    /// Parse a bit string such as `"0110"`. The length must be even and at most 64.
    fn from_str(s: &str) -> Result<Self> {
        if s.len() > 64 {
            return Err(GeoError::BadQuery(format!(
                "geohash string too long: {} characters",
                s.len()
            )));
        }
        if s.len() % 2 != 0 {
            return Err(GeoError::BadQuery(format!(
                "geohash string must have an even length: {}",
                s
            )));
        }

        let mut hash = 0u64;
        for (pos, c) in s.chars().enumerate() {
            match c {
                '1' => hash |= mask64_for(pos as u32),
                '0' => {}
                other => {
                    return Err(GeoError::BadQuery(format!(
                        "invalid character '{}' in geohash string",
                        other
                    )));
                }
            }
        }

        Ok(GeoHash {
            hash,
            bits: (s.len() / 2) as u32,
        })
    }
}

impl Serialize for GeoHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GeoHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
