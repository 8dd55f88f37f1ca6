use bitvec::prelude::*;
use std::fmt;

pub type Bits = BitVec<u64, Lsb0>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hap {
    First,
    Second,
}

impl Hap {
    pub fn index(self) -> usize {
        match self {
            Hap::First => 0,
            Hap::Second => 1,
        }
    }

    /// Haplotype `h` of the flat 0-based haplotype numbering (two per individual).
    pub fn split_flat(h: usize) -> (usize, Hap) {
        let hap = if h % 2 == 0 { Hap::First } else { Hap::Second };
        (h / 2, hap)
    }
}

impl fmt::Display for Hap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index() + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HapPair {
    pub i: usize,
    pub i_hap: Hap,
    pub j: usize,
    pub j_hap: Hap,
}

impl HapPair {
    pub fn new(i: usize, i_hap: Hap, j: usize, j_hap: Hap) -> Self {
        Self { i, i_hap, j, j_hap }
    }

    pub fn from_flat(a: usize, b: usize) -> Self {
        let (i, i_hap) = Hap::split_flat(a);
        let (j, j_hap) = Hap::split_flat(b);
        Self { i, i_hap, j, j_hap }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenotypeClass {
    HomMajor = 0,
    Het = 1,
    HomMinor = 2,
}

impl GenotypeClass {
    pub const ALL: [GenotypeClass; 3] = [
        GenotypeClass::HomMajor,
        GenotypeClass::Het,
        GenotypeClass::HomMinor,
    ];

    pub fn from_bits(het: bool, hom_minor: bool) -> Self {
        if het {
            GenotypeClass::Het
        } else if hom_minor {
            GenotypeClass::HomMinor
        } else {
            GenotypeClass::HomMajor
        }
    }
}

/// A haplotype pair queued for decoding over sites `from..to`.
///
/// `het` and `hom_minor` are indexed relative to `from`.
#[derive(Debug, Clone)]
pub struct PairObservation {
    pub pair: HapPair,
    pub from: usize,
    pub to: usize,
    pub het: Bits,
    pub hom_minor: Bits,
}

impl PairObservation {
    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn class_at(&self, pos: usize) -> GenotypeClass {
        let offset = pos - self.from;
        GenotypeClass::from_bits(self.het[offset], self.hom_minor[offset])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub family: String,
    pub id: String,
}

#[derive(Debug)]
pub struct Site {
    pub chrom: String,
    pub physical_position: u64,
    pub alleles: Bits,
}
