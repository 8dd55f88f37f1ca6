use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub first_word: usize,
    pub last_word: usize,
}

/// Open matches between haplotype pairs, keyed by `(lo, hi)` flat haplotype index.
#[derive(Debug, Default)]
pub struct ExtendHash {
    gap: usize,
    matches: HashMap<(u32, u32), Match>,
}

impl ExtendHash {
    /// A match stays open while at most `gap` consecutive words miss. Once
    /// `gap + 1` words in a row have gone by without the pair seeding, the
    /// next `end_stale` closes it.
    pub fn new(gap: usize) -> Self {
        Self {
            gap,
            matches: HashMap::new(),
        }
    }

    /// Records that `a` and `b` share word `w`, opening a match if none is open.
    pub fn extend_pair(&mut self, a: u32, b: u32, w: usize) {
        let key = (a.min(b), a.max(b));
        let entry = self.matches.entry(key).or_insert(Match {
            first_word: w,
            last_word: w,
        });
        entry.last_word = entry.last_word.max(w);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Closes every match whose last `gap + 1` words up to and including `w` all missed.
    pub fn end_stale(&mut self, w: usize) -> Vec<((u32, u32), Match)> {
        let gap = self.gap;
        let mut ended = Vec::new();
        self.matches.retain(|&key, m| {
            if m.last_word + gap < w {
                ended.push((key, *m));
                false
            } else {
                true
            }
        });
        ended.sort_unstable_by_key(|&(key, _)| key);
        ended
    }

    pub fn end_all(&mut self) -> Vec<((u32, u32), Match)> {
        let mut ended: Vec<_> = self.matches.drain().collect();
        ended.sort_unstable_by_key(|&(key, _)| key);
        ended
    }
}
