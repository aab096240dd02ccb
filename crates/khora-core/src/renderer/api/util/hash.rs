// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Portable 32-bit hash combination.
//!
//! These functions produce the same value on every platform, compiler and run.
//! They are used where a hash is persisted or compared across structures
//! (dynamic instancing hashes, pipeline precache hashes), which rules out the
//! randomly seeded hashers of `std` and `ahash`.

/// Mixes `value` into `seed`.
///
/// The classic golden-ratio combine:
/// `seed ^ (value + 0x9e3779b9 + (seed << 6) + (seed >> 2))`, with all
/// arithmetic wrapping at 32 bits.
#[inline]
pub const fn hash_combine(seed: u32, value: u32) -> u32 {
    seed ^ value
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// Folds a 64-bit value into 32 bits.
#[inline]
pub const fn hash_u64(value: u64) -> u32 {
    hash_combine(value as u32, (value >> 32) as u32)
}

/// Combines every 32-bit little-endian word of `bytes` into `seed`.
///
/// A trailing partial word is zero-padded.
pub fn hash_bytes(seed: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(4);
    let mut hash = seed;
    for word in &mut chunks {
        hash = hash_combine(hash, u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut word = [0u8; 4];
        word[..tail.len()].copy_from_slice(tail);
        hash = hash_combine(hash, u32::from_le_bytes(word));
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_combine_known_value() {
        // 0 ^ (0 + 0x9e3779b9 + 0 + 0)
        assert_eq!(hash_combine(0, 0), 0x9e37_79b9);
    }

    #[test]
    fn test_hash_combine_is_order_sensitive() {
        let ab = hash_combine(hash_combine(0, 1), 2);
        let ba = hash_combine(hash_combine(0, 2), 1);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_hash_bytes_pads_tail() {
        assert_eq!(hash_bytes(7, &[1, 2]), hash_bytes(7, &[1, 2, 0, 0]));
        assert_ne!(hash_bytes(7, &[1, 2]), hash_bytes(7, &[2, 1]));
    }
}
