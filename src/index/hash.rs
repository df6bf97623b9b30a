//! 64-bit average perceptual hash.
//!
//! The image is resized to 8x8, converted to grayscale, and every cell is
//! compared with the mean brightness of all 64 cells: brighter cells set
//! their bit. Bits are laid out row-major, most significant bit first, and
//! rendered as 16 lowercase hex digits.

use crate::util::{LocateError, LocateResult};
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of bits in a hash.
pub const HASH_BITS: u32 = 64;

/// Fingerprint of an image's coarse brightness pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Number of differing bits.
    pub fn distance(self, other: PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// `1 - distance / 64`.
    pub fn similarity(self, other: PerceptualHash) -> f32 {
        1.0 - self.distance(other) as f32 / HASH_BITS as f32
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = LocateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches("0x");
        if trimmed.is_empty() || trimmed.len() > 16 {
            return Err(LocateError::Json {
                reason: format!("invalid perceptual hash {s:?}"),
            });
        }
        u64::from_str_radix(trimmed, 16)
            .map(PerceptualHash)
            .map_err(|err| LocateError::Json {
                reason: format!("invalid perceptual hash {s:?}: {err}"),
            })
    }
}

impl Serialize for PerceptualHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PerceptualHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Computes the average hash of an RGB raster.
pub fn perceptual_hash(img: &RgbImage) -> PerceptualHash {
    let small = image::imageops::resize(img, 8, 8, FilterType::Triangle);
    let gray = image::imageops::grayscale(&small);
    let cells: Vec<u32> = gray.pixels().map(|p| p.0[0] as u32).collect();
    let total: u32 = cells.iter().sum();
    let mean = total as f64 / cells.len().max(1) as f64;

    let mut bits = 0u64;
    for (i, &v) in cells.iter().enumerate() {
        if v as f64 > mean {
            bits |= 1u64 << (63 - i);
        }
    }
    PerceptualHash(bits)
}

/// Decodes image bytes and hashes them.
pub fn perceptual_hash_bytes(bytes: &[u8]) -> LocateResult<PerceptualHash> {
    Ok(perceptual_hash(&crate::image::io::decode_rgb(bytes)?))
}

/// Number of differing bits between two hashes.
pub fn hamming_distance(a: PerceptualHash, b: PerceptualHash) -> u32 {
    a.distance(b)
}

#[cfg(test)]
mod tests {
    use super::{hamming_distance, perceptual_hash, PerceptualHash};
    use image::{Rgb, RgbImage};

    #[test]
    fn left_bright_half_sets_left_columns() {
        let img = RgbImage::from_fn(64, 64, |x, _| {
            if x < 32 {
                Rgb([250, 250, 250])
            } else {
                Rgb([5, 5, 5])
            }
        });
        let hash = perceptual_hash(&img);
        assert_eq!(hash.to_string(), "f0f0f0f0f0f0f0f0");
    }

    #[test]
    fn hex_round_trip_keeps_leading_zeros() {
        let hash = PerceptualHash(0x00ff_0000_0000_0001);
        assert_eq!(hash.to_string(), "00ff000000000001");
        assert_eq!("00ff000000000001".parse::<PerceptualHash>().unwrap(), hash);
        assert_eq!("ff000000000001".parse::<PerceptualHash>().unwrap(), hash);
        assert!("xyz".parse::<PerceptualHash>().is_err());
    }

    #[test]
    fn distance_counts_bits() {
        let a = PerceptualHash(0b1011);
        let b = PerceptualHash(0b0110);
        assert_eq!(hamming_distance(a, b), 3);
        assert!((a.similarity(a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn serde_uses_hex_strings() {
        let hash = PerceptualHash(0xabc);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"0000000000000abc\"");
        let back: PerceptualHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
