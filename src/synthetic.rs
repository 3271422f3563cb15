//! Corpora drawn from the LDA generative process, for smoke runs and tests.

use rand::Rng;
use rand::distributions::{Gamma, IndependentSample, LogNormal, Sample};

use crate::data_block::Bag;

/// Discrete distribution over `0..n` drawn by bisecting cumulative weights.
#[derive(Clone, Debug)]
pub struct Categorical {
    cumulative: Vec<f64>,
}

impl Categorical {
    /// `weights` need not be normalised but must have a positive sum.
    pub fn new(weights: &[f64]) -> Categorical {
        let mut acc = 0.0;
        let cumulative = weights
            .iter()
            .map(|&w| {
                acc += w.max(0.0);
                acc
            })
            .collect();
        Categorical { cumulative }
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }
}

impl Sample<usize> for Categorical {
    fn sample<R: Rng>(&mut self, rng: &mut R) -> usize {
        self.ind_sample(rng)
    }
}

impl IndependentSample<usize> for Categorical {
    fn ind_sample<R: Rng>(&self, rng: &mut R) -> usize {
        let total = self.cumulative.last().cloned().unwrap_or(0.0);
        let u = rng.next_f64() * total;
        // first entry whose cumulative weight exceeds u; skips zero weights
        let k = self.cumulative.partition_point(|&c| c <= u);
        k.min(self.cumulative.len().saturating_sub(1))
    }
}

/// Dirichlet draws as normalised independent Gamma(α_k, 1) variates.
#[derive(Clone)]
pub struct Dirichlet {
    gammas: Vec<Gamma>,
}

impl Dirichlet {
    pub fn new(alpha: &[f64]) -> Dirichlet {
        Dirichlet { gammas: alpha.iter().map(|&a| Gamma::new(a, 1.0)).collect() }
    }
}

impl Sample<Vec<f64>> for Dirichlet {
    fn sample<R: Rng>(&mut self, rng: &mut R) -> Vec<f64> {
        self.ind_sample(rng)
    }
}

impl IndependentSample<Vec<f64>> for Dirichlet {
    fn ind_sample<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let mut xs: Vec<f64> = self.gammas.iter().map(|g| g.ind_sample(rng)).collect();
        let sum: f64 = xs.iter().sum();
        xs.iter_mut().for_each(|x| *x /= sum);
        xs
    }
}

/// Draw `num_docs` bags: topic-word distributions from Dir(beta), per-document
/// topic mixtures from Dir(alpha), lengths from a log-normal.
pub fn make_dataset<R: Rng>(
    rng: &mut R,
    num_docs: usize,
    mean_nd: f64,
    std_dev_nd: f64,
    alpha: &[f64],
    beta: &[f64],
) -> Vec<Bag> {
    let topic_words = Dirichlet::new(beta);
    let phi: Vec<Categorical> = (0..alpha.len())
        .map(|_| Categorical::new(&topic_words.ind_sample(rng)))
        .collect();
    let doc_topics = Dirichlet::new(alpha);
    let lognorm = LogNormal::new(mean_nd, std_dev_nd);
    let mut bags = Vec::with_capacity(num_docs);
    for _ in 0..num_docs {
        let theta = Categorical::new(&doc_topics.ind_sample(rng));
        let nd = f64::ceil(lognorm.ind_sample(rng)) as usize;
        let mut bag = Bag::new();
        for _ in 0..nd {
            let z = theta.ind_sample(rng);
            let w = phi[z].ind_sample(rng);
            *bag.entry(w as u32).or_insert(0) += 1;
        }
        bags.push(bag);
    }
    bags
}
