use crate::genotypes::GenotypeStore;

/// Haplotypes cut into fixed-width words over the sites used for seeding.
///
/// Only sites whose minor allele frequency reaches `min_maf` take part. Word
/// `w` packs up to `word_size` consecutive such sites into a `u64`, first site
/// in the lowest bit.
pub struct WordIndex {
    word_size: usize,
    // all-site index of every seeding site
    sites: Vec<usize>,
    n_words: usize,
    // haplotype-major: words[h * n_words + w]
    words: Vec<u64>,
    genetic_positions: Vec<f64>,
}

impl WordIndex {
    pub fn build(store: &GenotypeStore, min_maf: f64, word_size: usize) -> Self {
        assert!((1..=64).contains(&word_size), "word size {word_size} out of range");
        let sites: Vec<usize> = (0..store.n_sites())
            .filter(|&pos| {
                let freq = store.minor_allele_frequency(pos);
                freq.min(1.0 - freq) >= min_maf
            })
            .collect();
        let n_words = sites.len().div_ceil(word_size);

        let n_haps = store.n_haps();
        let mut words = vec![0u64; n_haps * n_words];
        for h in 0..n_haps {
            let hap = store.flat_haplotype(h);
            for (w, chunk) in sites.chunks(word_size).enumerate() {
                let mut word = 0u64;
                for (bit, &pos) in chunk.iter().enumerate() {
                    if hap[pos] {
                        word |= 1 << bit;
                    }
                }
                words[h * n_words + w] = word;
            }
        }

        Self {
            word_size,
            sites,
            n_words,
            words,
            genetic_positions: store.genetic_positions().to_vec(),
        }
    }

    pub fn n_words(&self) -> usize {
        self.n_words
    }

    #[cfg(test)]
    pub fn n_haps(&self) -> usize {
        if self.n_words == 0 {
            0
        } else {
            self.words.len() / self.n_words
        }
    }

    pub fn word(&self, hap: usize, w: usize) -> u64 {
        self.words[hap * self.n_words + w]
    }

    /// All-site range `from..to` covered by words `first..=last`.
    pub fn site_range(&self, first: usize, last: usize) -> (usize, usize) {
        let from = self.sites[first * self.word_size];
        let last_site = ((last + 1) * self.word_size).min(self.sites.len()) - 1;
        (from, self.sites[last_site] + 1)
    }

    pub fn span_cm(&self, first: usize, last: usize) -> f64 {
        let (from, to) = self.site_range(first, last);
        100.0 * (self.genetic_positions[to - 1] - self.genetic_positions[from])
    }
}
