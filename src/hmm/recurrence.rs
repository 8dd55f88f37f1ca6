use crate::hmm::emission::SiteModel;
use crate::model::PairObservation;
use crate::table::{DecodingTable, Transition};

/// Linear-time forward/backward passes over a [`SiteModel`].
///
/// The scalar passes decode one observation and keep every vector; they are
/// the reference the batched pass must reproduce. The batched pass keeps
/// forward vectors for the whole batch, laid out `[site][state][member]`,
/// and streams posteriors while it walks backwards.
///
/// Rescaling happens for the whole batch on the same sites (every
/// `scaling_skip`), but each member is divided by its own sum rather than by
/// one factor shared across the batch. Posteriors do not depend on the scale.
pub struct Kernel<'a> {
    table: &'a DecodingTable,
    sites: SiteModel,
    scaling_skip: usize,
}

impl<'a> Kernel<'a> {
    pub fn new(table: &'a DecodingTable, sites: SiteModel, scaling_skip: usize) -> Self {
        Self {
            table,
            sites,
            scaling_skip: scaling_skip.max(1),
        }
    }

    pub fn n_states(&self) -> usize {
        self.table.n_states()
    }

    fn transition_into(&self, pos: usize) -> &Transition {
        self.table.transition(self.sites.transition_at(pos))
    }

    pub fn forward(&self, obs: &PairObservation) -> Vec<Vec<f32>> {
        let n_states = self.n_states();
        let initial = self.table.initial();
        let mut alphas: Vec<Vec<f32>> = Vec::with_capacity(obs.len());

        let (is_zero, is_two) = indicators(obs, obs.from);
        let mut first: Vec<f32> = (0..n_states)
            .map(|k| initial[k] * self.sites.emission(obs.from, is_zero, is_two, k))
            .collect();
        normalize(&mut first);
        alphas.push(first);

        let mut suffix = vec![0.0; n_states + 1];
        for pos in (obs.from + 1)..obs.to {
            let (is_zero, is_two) = indicators(obs, pos);
            let t = self.transition_into(pos);
            let prev = &alphas[alphas.len() - 1];

            for k in (0..n_states).rev() {
                suffix[k] = suffix[k + 1] + prev[k];
            }
            let mut next = vec![0.0; n_states];
            let mut from_below = 0.0;
            for k in 0..n_states {
                if k > 0 {
                    from_below = t.above[k - 1] * prev[k - 1] + t.ratio[k - 1] * from_below;
                }
                next[k] = (from_below + t.diagonal[k] * prev[k] + t.below[k] * suffix[k + 1])
                    * self.sites.emission(pos, is_zero, is_two, k);
            }
            normalize(&mut next);
            alphas.push(next);
        }
        alphas
    }

    pub fn backward(&self, obs: &PairObservation) -> Vec<Vec<f32>> {
        let n_states = self.n_states();
        let len = obs.len();
        let mut betas = vec![Vec::new(); len];
        betas[len - 1] = vec![1.0 / n_states as f32; n_states];

        let mut scratch = vec![0.0; n_states];
        let mut tail = vec![0.0; n_states];
        for pos in (obs.from..obs.to - 1).rev() {
            let (is_zero, is_two) = indicators(obs, pos + 1);
            let t = self.transition_into(pos + 1);
            let next = &betas[pos + 1 - obs.from];
            for k in 0..n_states {
                scratch[k] = next[k] * self.sites.emission(pos + 1, is_zero, is_two, k);
            }

            tail[n_states - 1] = 0.0;
            for i in (0..n_states - 1).rev() {
                tail[i] = scratch[i + 1] + t.ratio[i + 1] * tail[i + 1];
            }
            let mut current = vec![0.0; n_states];
            let mut to_below = 0.0;
            for i in 0..n_states {
                current[i] = to_below + t.diagonal[i] * scratch[i] + t.above[i] * tail[i];
                to_below += t.below[i] * scratch[i];
            }
            normalize(&mut current);
            betas[pos - obs.from] = current;
        }
        betas
    }

    /// Runs one pass over every member of `batch` and hands each per-site
    /// posterior to `on_site(member, pos, posterior)`.
    ///
    /// Members may cover different site ranges; the pass spans their union
    /// and each member's recurrence starts and stops at its own range. Sites
    /// are visited from last to first.
    pub fn posteriors_batched<F>(&self, batch: &[PairObservation], mut on_site: F)
    where
        F: FnMut(usize, usize, &[f32]),
    {
        let n_members = batch.len();
        if n_members == 0 {
            return;
        }
        let n_states = self.n_states();
        let width = n_states * n_members;
        let lo = batch.iter().map(|o| o.from).min().unwrap_or(0);
        let hi = batch.iter().map(|o| o.to).max().unwrap_or(0);
        let len = hi - lo;

        let mut is_zero = vec![0.0f32; len * n_members];
        let mut is_two = vec![0.0f32; len * n_members];
        for (b, obs) in batch.iter().enumerate() {
            for pos in obs.from..obs.to {
                let (zero, two) = indicators(obs, pos);
                is_zero[(pos - lo) * n_members + b] = zero;
                is_two[(pos - lo) * n_members + b] = two;
            }
        }
        let site_indicators = |pos: usize| {
            let row = (pos - lo) * n_members;
            (
                &is_zero[row..row + n_members],
                &is_two[row..row + n_members],
            )
        };

        let initial = self.table.initial();
        let mut emission = vec![0.0f32; width];
        let mut alpha = vec![0.0f32; len * width];
        let mut suffix = vec![0.0f32; (n_states + 1) * n_members];
        let mut carry = vec![0.0f32; n_members];

        for pos in lo..hi {
            let row = pos - lo;
            let (zero, two) = site_indicators(pos);
            self.fill_emission(pos, zero, two, &mut emission);
            let (done, rest) = alpha.split_at_mut(row * width);
            let next = &mut rest[..width];

            if row > 0 {
                let prev = &done[(row - 1) * width..];
                let t = self.transition_into(pos);
                suffix[n_states * n_members..].fill(0.0);
                for k in (0..n_states).rev() {
                    for b in 0..n_members {
                        suffix[k * n_members + b] =
                            suffix[(k + 1) * n_members + b] + prev[k * n_members + b];
                    }
                }
                carry.fill(0.0);
                for k in 0..n_states {
                    for b in 0..n_members {
                        let idx = k * n_members + b;
                        if k > 0 {
                            carry[b] = t.above[k - 1] * prev[idx - n_members]
                                + t.ratio[k - 1] * carry[b];
                        }
                        next[idx] = (carry[b]
                            + t.diagonal[k] * prev[idx]
                            + t.below[k] * suffix[idx + n_members])
                            * emission[idx];
                    }
                }
            }

            for (b, obs) in batch.iter().enumerate() {
                if pos == obs.from {
                    for k in 0..n_states {
                        next[k * n_members + b] = initial[k] * emission[k * n_members + b];
                    }
                } else if pos < obs.from || pos >= obs.to {
                    for k in 0..n_states {
                        next[k * n_members + b] = 0.0;
                    }
                }
            }
            if row % self.scaling_skip == 0 {
                rescale(next, n_members);
            }
        }

        let mut beta = vec![0.0f32; width];
        let mut beta_next = vec![0.0f32; width];
        let mut scratch = vec![0.0f32; width];
        let mut tail = vec![0.0f32; width];
        let mut posterior = vec![0.0f32; n_states];

        for pos in (lo..hi).rev() {
            let row = pos - lo;
            if pos + 1 < hi {
                let (zero, two) = site_indicators(pos + 1);
                self.fill_emission(pos + 1, zero, two, &mut emission);
                let t = self.transition_into(pos + 1);
                for idx in 0..width {
                    scratch[idx] = beta_next[idx] * emission[idx];
                }
                let last = (n_states - 1) * n_members;
                tail[last..].fill(0.0);
                for i in (0..n_states - 1).rev() {
                    for b in 0..n_members {
                        let idx = i * n_members + b;
                        tail[idx] = scratch[idx + n_members] + t.ratio[i + 1] * tail[idx + n_members];
                    }
                }
                carry.fill(0.0);
                for i in 0..n_states {
                    for b in 0..n_members {
                        let idx = i * n_members + b;
                        beta[idx] = carry[b] + t.diagonal[i] * scratch[idx] + t.above[i] * tail[idx];
                        carry[b] += t.below[i] * scratch[idx];
                    }
                }
            }

            for (b, obs) in batch.iter().enumerate() {
                if pos + 1 == obs.to {
                    for k in 0..n_states {
                        beta[k * n_members + b] = 1.0;
                    }
                } else if pos < obs.from || pos >= obs.to {
                    for k in 0..n_states {
                        beta[k * n_members + b] = 0.0;
                    }
                }
            }
            if (hi - 1 - pos) % self.scaling_skip == 0 {
                rescale(&mut beta, n_members);
            }

            let alpha_row = &alpha[row * width..(row + 1) * width];
            for (b, obs) in batch.iter().enumerate() {
                if pos < obs.from || pos >= obs.to {
                    continue;
                }
                for k in 0..n_states {
                    let idx = k * n_members + b;
                    posterior[k] = alpha_row[idx] * beta[idx];
                }
                normalize(&mut posterior);
                on_site(b, pos, &posterior);
            }
            std::mem::swap(&mut beta, &mut beta_next);
        }
    }

    fn fill_emission(&self, pos: usize, is_zero: &[f32], is_two: &[f32], out: &mut [f32]) {
        let n_members = is_zero.len();
        let [e1, e0_minus1, e2_minus0] = self.sites.rows(pos);
        for k in 0..self.n_states() {
            for b in 0..n_members {
                out[k * n_members + b] = e1[k] + is_zero[b] * e0_minus1[k] + is_two[b] * e2_minus0[k];
            }
        }
    }
}

pub fn posteriors(alphas: &[Vec<f32>], betas: &[Vec<f32>]) -> Vec<Vec<f32>> {
    alphas
        .iter()
        .zip(betas)
        .map(|(alpha, beta)| {
            let mut posterior: Vec<f32> = alpha.iter().zip(beta).map(|(a, b)| a * b).collect();
            normalize(&mut posterior);
            posterior
        })
        .collect()
}

fn indicators(obs: &PairObservation, pos: usize) -> (f32, f32) {
    let offset = pos - obs.from;
    let is_zero = if obs.het[offset] { 0.0 } else { 1.0 };
    let is_two = if obs.hom_minor[offset] { 1.0 } else { 0.0 };
    (is_zero, is_two)
}

fn normalize(values: &mut [f32]) {
    let total: f32 = values.iter().sum();
    if total > 0.0 {
        let inv = 1.0 / total;
        values.iter_mut().for_each(|v| *v *= inv);
    }
}

fn rescale(block: &mut [f32], n_members: usize) {
    let n_states = block.len() / n_members;
    for b in 0..n_members {
        let total: f32 = (0..n_states).map(|k| block[k * n_members + b]).sum();
        if total > 0.0 {
            let inv = 1.0 / total;
            for k in 0..n_states {
                block[k * n_members + b] *= inv;
            }
        }
    }
}
