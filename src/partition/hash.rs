//! Partition hashing. Client and members must agree bit for bit on how a routing key maps to a
//! partition, otherwise requests land on members that don't own the data.

pub(crate) const PARTITION_HASH_SEED: u32 = 0x0100_0193;

/// MurmurHash3 x86 32-bit.
pub(crate) fn murmur3_x86_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let len = data.len();
    let mut h1 = seed;

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    let mut k1 = 0u32;
    if tail.len() >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= len as u32;
    fmix32(h1)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Maps a signed hash onto `[0, length)`. `i32::MIN` has no positive counterpart and maps to 0.
pub(crate) fn hash_to_index(hash: i32, length: i32) -> i32 {
    if hash == i32::MIN {
        return 0;
    }
    hash.abs() % length
}

pub(crate) fn partition_hash(key: &[u8]) -> i32 {
    murmur3_x86_32(key, PARTITION_HASH_SEED) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur3_known_vectors() {
        assert_eq!(murmur3_x86_32(b"", 0), 0);
        assert_eq!(murmur3_x86_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmur3_x86_32(b"", 0xffff_ffff), 0x81f1_6f39);
        assert_eq!(murmur3_x86_32(b"hello", 0), 0x248b_fa47);
    }

    #[test]
    fn hash_to_index_bounds() {
        assert_eq!(hash_to_index(i32::MIN, 271), 0);
        assert_eq!(hash_to_index(-5, 271), 5);
        assert_eq!(hash_to_index(275, 271), 4);
        for hash in [i32::MAX, i32::MIN + 1, -1, 0, 1].iter() {
            let index = hash_to_index(*hash, 271);
            assert!(index >= 0 && index < 271, "{} -> {}", hash, index);
        }
    }

    #[test]
    fn partition_hash_is_deterministic() {
        assert_eq!(partition_hash(b"user-123"), partition_hash(b"user-123"));
        assert_ne!(partition_hash(b"user-123"), partition_hash(b"user-124"));
    }
}
