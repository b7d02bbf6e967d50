use eyre::{ensure, Result};
use rand::Rng;

/// Moving-block bootstrap with fixed block length and periodic wraparound
///
/// The block length follows Hall's rule for dependent data, `ceil(n^(1/5))`,
/// and `floor(n / lb)` blocks are drawn, so every draw has the same length
/// `floor(n / lb) * lb`, which may be shorter than `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockBootstrap {
    n: usize,
    block_length: usize,
    nblocks: usize,
}

/// One resampled index set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    /// All drawn indices, block by block, with repetition
    pub indices: Vec<usize>,
    /// Distinct drawn indices in ascending order
    pub unique: Vec<usize>,
    /// Occurrences of each entry of `unique` in `indices`
    pub counts: Vec<usize>,
}

impl Draw {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn from_indices(indices: Vec<usize>, n: usize) -> Self {
        let mut occurrences = vec![0usize; n];
        for &i in &indices {
            occurrences[i] += 1;
        }
        let (unique, counts) = occurrences
            .into_iter()
            .enumerate()
            .filter(|(_, count)| *count > 0)
            .unzip();
        Self {
            indices,
            unique,
            counts,
        }
    }
}

impl BlockBootstrap {
    /// Sampler for a series of `n` points
    pub fn new(n: usize) -> Result<Self> {
        ensure!(
            n >= 2,
            "Block bootstrap needs at least 2 observations, got {}",
            n
        );
        let block_length = block_length(n);
        Ok(Self {
            n,
            block_length,
            nblocks: n / block_length,
        })
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    pub fn nblocks(&self) -> usize {
        self.nblocks
    }

    /// Length of every draw produced by this sampler
    pub fn draw_length(&self) -> usize {
        self.nblocks * self.block_length
    }

    /// Draws one resample from `rng`
    ///
    /// Block starts are uniform on `[0, n - 1)`, so the last index of the
    /// series never starts a block; it is still reached by blocks running
    /// into it.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Draw {
        let mut indices = Vec::with_capacity(self.draw_length());
        for _ in 0..self.nblocks {
            let start = rng.random_range(0..self.n - 1);
            indices.extend((0..self.block_length).map(|k| (start + k) % self.n));
        }
        Draw::from_indices(indices, self.n)
    }
}

/// Hall's block length `ceil(n^(1/5))`
pub fn block_length(n: usize) -> usize {
    // Guard against n^(1/5) landing a hair above an exact integer
    let root = (n as f64).powf(0.2);
    let rounded = root.round();
    if (root - rounded).abs() < 1e-9 {
        rounded as usize
    } else {
        root.ceil() as usize
    }
}
