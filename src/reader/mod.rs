pub mod common;
pub mod haps;

use crate::error::Result;
use crate::model::{Sample, Site};

pub trait SiteReader: Iterator<Item = Result<Site>> {
    fn samples(&self) -> &[Sample];
    fn n_sites(&self) -> usize;
}
