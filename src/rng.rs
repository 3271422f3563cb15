use rand::{Rng, SeedableRng};

const DEFAULT_SEED: u32 = 1234567;

/// Scale from a 31-bit integer to `[0, 1)`.
const INV_2_31: f64 = 1.0 / 2147483648.0;

/// A small xorshift generator producing 31-bit integers.
///
/// Every draw of the sampler goes through this type, so it stays a plain
/// struct with inlined arithmetic rather than a trait object.
#[derive(Clone, Debug)]
pub struct Xorshift {
    state: u32,
}

impl Xorshift {
    pub fn new(seed: u32) -> Xorshift {
        Xorshift {
            state: if seed == 0 { DEFAULT_SEED } else { seed },
        }
    }

    /// Derive an independent stream, e.g. one per worker.
    pub fn from_rng<R: Rng>(rng: &mut R) -> Xorshift {
        Xorshift::new(rng.next_u32())
    }

    /// Uniform integer in `[0, 2^31)`.
    #[inline]
    pub fn rand(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x & 0x7FFF_FFFF
    }

    /// Uniform float in `[0, 1)`.
    #[inline]
    pub fn rand_double(&mut self) -> f64 {
        self.rand() as f64 * INV_2_31
    }

    /// Uniform integer in `[0, k)`.
    #[inline]
    pub fn rand_k(&mut self, k: u32) -> u32 {
        let r = (self.rand_double() * k as f64) as u32;
        if r >= k { k - 1 } else { r }
    }
}

impl Rng for Xorshift {
    fn next_u32(&mut self) -> u32 {
        // Two 31-bit draws cover all 32 bits.
        (self.rand() << 1) ^ (self.rand() >> 15)
    }
}

impl SeedableRng<u32> for Xorshift {
    fn reseed(&mut self, seed: u32) {
        *self = Xorshift::new(seed);
    }

    fn from_seed(seed: u32) -> Xorshift {
        Xorshift::new(seed)
    }
}
