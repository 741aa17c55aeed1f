//! Portable deterministic randomness for consensus decisions.
//!
//! Quorum selection and swarm rebalancing must produce the same permutation
//! on every node, across platforms and library upgrades. The MT19937-64
//! engine below matches the C++ `std::mt19937_64` output stream bit for
//! bit, and the uniform draw uses rejection sampling so the mapping from
//! raw draws to bounded values is division-free of modulo bias and
//! identical everywhere.

const NN: usize = 312;
const MM: usize = 156;
const MATRIX_A: u64 = 0xB502_6F5A_A966_19E9;
const UPPER_MASK: u64 = 0xFFFF_FFFF_8000_0000;
const LOWER_MASK: u64 = 0x0000_0000_7FFF_FFFF;

/// A 64-bit Mersenne Twister. Output-compatible with `std::mt19937_64`.
pub struct ConsensusShuffleRng {
    state: [u64; NN],
    index: usize,
}

impl ConsensusShuffleRng {
    /// Seed the engine exactly as the C++ standard specifies.
    pub fn new(seed: u64) -> Self {
        let mut state = [0u64; NN];
        state[0] = seed;
        for i in 1..NN {
            state[i] = 6364136223846793005u64
                .wrapping_mul(state[i - 1] ^ (state[i - 1] >> 62))
                .wrapping_add(i as u64);
        }
        Self { state, index: NN }
    }

    /// The engine's maximum output.
    pub const fn max() -> u64 {
        u64::MAX
    }

    /// Next raw 64-bit draw.
    pub fn next_u64(&mut self) -> u64 {
        if self.index >= NN {
            self.generate_block();
        }
        let mut x = self.state[self.index];
        self.index += 1;

        x ^= (x >> 29) & 0x5555_5555_5555_5555;
        x ^= (x << 17) & 0x71D6_7FFF_EDA6_0000;
        x ^= (x << 37) & 0xFFF7_EEE0_0000_0000;
        x ^= x >> 43;
        x
    }

    fn generate_block(&mut self) {
        for i in 0..NN {
            let x = (self.state[i] & UPPER_MASK) | (self.state[(i + 1) % NN] & LOWER_MASK);
            let mut next = x >> 1;
            if x & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.state[i] = self.state[(i + MM) % NN] ^ next;
        }
        self.index = 0;
    }
}

/// Uniform draw in `[0, n)` by rejection sampling.
///
/// `secureMax = max - max % n`; raw draws at or above `secureMax` are
/// discarded, and the survivor is divided down. This is the portable
/// mapping every implementation must reproduce.
pub fn uniform_distribution_portable(rng: &mut ConsensusShuffleRng, n: u64) -> u64 {
    debug_assert!(n > 0);
    let secure_max = ConsensusShuffleRng::max() - ConsensusShuffleRng::max() % n;
    loop {
        let x = rng.next_u64();
        if x < secure_max {
            return x / (secure_max / n);
        }
    }
}

/// The consensus partial shuffle: positions `1..len` each swap with a
/// uniformly drawn position at or below themselves.
pub fn consensus_shuffle<T>(items: &mut [T], seed: u64) {
    if items.len() <= 1 {
        return;
    }
    let mut rng = ConsensusShuffleRng::new(seed);
    for i in 1..items.len() {
        let j = uniform_distribution_portable(&mut rng, (i + 1) as u64) as usize;
        if i != j {
            items.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_std_mt19937_64_reference() {
        // First outputs of the default-seeded (5489) engine.
        let mut rng = ConsensusShuffleRng::new(5489);
        assert_eq!(rng.next_u64(), 14514284786278117030);
        assert_eq!(rng.next_u64(), 4620546740167642908);
        assert_eq!(rng.next_u64(), 13109570281517897720);
    }

    #[test]
    fn ten_thousandth_output_matches_the_cxx_standard() {
        // [rand.predef] fixes the 10000th consecutive invocation of a
        // default-constructed std::mt19937_64.
        let mut rng = ConsensusShuffleRng::new(5489);
        let mut last = 0;
        for _ in 0..10_000 {
            last = rng.next_u64();
        }
        assert_eq!(last, 9981545732273789042);
    }

    #[test]
    fn uniform_draw_is_bounded() {
        let mut rng = ConsensusShuffleRng::new(1);
        for n in [1u64, 2, 3, 7, 10, 1_000] {
            for _ in 0..200 {
                assert!(uniform_distribution_portable(&mut rng, n) < n);
            }
        }
    }

    #[test]
    fn shuffle_is_deterministic() {
        let mut a: Vec<u32> = (0..50).collect();
        let mut b: Vec<u32> = (0..50).collect();
        consensus_shuffle(&mut a, 0xdead_beef);
        consensus_shuffle(&mut b, 0xdead_beef);
        assert_eq!(a, b);

        let mut c: Vec<u32> = (0..50).collect();
        consensus_shuffle(&mut c, 0xdead_bee0);
        assert_ne!(a, c);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut a: Vec<u32> = (0..100).collect();
        consensus_shuffle(&mut a, 42);
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn singleton_and_empty_are_untouched() {
        let mut empty: Vec<u32> = vec![];
        consensus_shuffle(&mut empty, 1);
        let mut one = vec![9u32];
        consensus_shuffle(&mut one, 1);
        assert_eq!(one, vec![9]);
    }
}
