//! Integer mixers used to turn quantized cell coordinates into table indices
//! and verification checksums. Both families are deterministic and stateless,
//! so every producer thread derives identical values for the same cell.

/// Bob Jenkins' 32-bit integer mix. Applied to each axis on its own.
#[inline]
pub fn jenkins32(mut a: u32) -> u32 {
    a = a.wrapping_add(0x7ed5_5d16).wrapping_add(a << 12);
    a = (a ^ 0xc761_c23c) ^ (a >> 19);
    a = a.wrapping_add(0x1656_67b1).wrapping_add(a << 5);
    a = a.wrapping_add(0xd3a2_646c) ^ (a << 9);
    a = a.wrapping_add(0xfd70_46c5).wrapping_add(a << 3);
    a = (a ^ 0xb55a_4f09) ^ (a >> 16);
    a
}

/// Final avalanche from murmur3.
#[inline]
pub fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// PCG output permutation; an unrelated family from `jenkins32`.
#[inline]
pub fn pcg32(v: u32) -> u32 {
    let state = v.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Position hash: each axis mixed independently, rotated apart so that
/// permuted coordinates do not cancel, then avalanched.
#[inline]
pub fn index_hash(coord: [i32; 3]) -> u32 {
    let hx = jenkins32(coord[0] as u32);
    let hy = jenkins32(coord[1] as u32 ^ 0x9e37_79b1).rotate_left(11);
    let hz = jenkins32(coord[2] as u32 ^ 0x85eb_ca6b).rotate_left(22);
    fmix32(hx ^ hy ^ hz)
}

/// Checksum hash. Chains the coordinate and the cascade level through
/// `pcg32` so it stays uncorrelated with `index_hash`. May return zero;
/// callers map that to a sentinel.
#[inline]
pub fn checksum_hash(level: u32, coord: [i32; 3]) -> u32 {
    let mut h = pcg32(coord[0] as u32 ^ 0x2545_f491);
    h = pcg32(h ^ coord[1] as u32);
    h = pcg32(h ^ coord[2] as u32);
    pcg32(h ^ level.wrapping_mul(0x9e37_79b9))
}

/// Hash to a unit float, used by the debug colour helpers.
#[inline]
pub fn u01(v: u32) -> f32 {
    (v as f32) * (1.0 / 4294967296.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn index_hash_is_stable() {
        assert_eq!(index_hash([1, 2, 3]), index_hash([1, 2, 3]));
        assert_ne!(index_hash([1, 2, 3]), index_hash([3, 2, 1]));
        assert_ne!(index_hash([0, 0, 0]), index_hash([0, 0, 1]));
    }

    #[test]
    fn checksum_separates_cascade_levels() {
        assert_ne!(checksum_hash(0, [4, -2, 9]), checksum_hash(1, [4, -2, 9]));
    }

    #[test]
    fn neighbouring_cells_rarely_share_a_checksum() {
        let mut seen = HashSet::new();
        let mut duplicates = 0;
        for x in -16..16 {
            for y in -16..16 {
                for z in -16..16 {
                    if !seen.insert(checksum_hash(0, [x, y, z])) {
                        duplicates += 1;
                    }
                }
            }
        }
        assert!(duplicates <= 2, "{duplicates} checksum duplicates in a 32^3 block");
    }
}
