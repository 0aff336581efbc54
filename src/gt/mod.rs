pub mod basic_gt;
pub mod haps_gt;
pub mod ref_gt;
pub mod views;

pub use basic_gt::{BasicGT, BasicGTRec};
pub use haps_gt::HapsGT;
pub use ref_gt::{RefGT, RefGTRec};
pub use views::{RestrictedGT, SplicedGT};

use crate::marker::Markers;
use crate::samples::Samples;

/// Read-only access to per-marker alleles for a set of samples.
///
/// `allele1`/`allele2` return `-1` for a missing allele. `allele(m, h)`
/// addresses haplotype `h`, where sample `s` owns haplotypes `2s` and
/// `2s + 1`; for unphased data the order within a sample carries no
/// information.
pub trait GT: Send + Sync {
    fn markers(&self) -> &Markers;

    fn samples(&self) -> &Samples;

    fn allele1(&self, marker: usize, sample: usize) -> i32;

    fn allele2(&self, marker: usize, sample: usize) -> i32;

    fn allele(&self, marker: usize, hap: usize) -> i32 {
        if hap & 1 == 0 {
            self.allele1(marker, hap >> 1)
        } else {
            self.allele2(marker, hap >> 1)
        }
    }

    /// True when every genotype at every marker is phased and non-missing.
    fn is_phased(&self) -> bool;

    /// True when sample `sample`'s genotype at `marker` is phased.
    fn is_phased_at(&self, marker: usize, sample: usize) -> bool;

    fn n_markers(&self) -> usize {
        self.markers().n_markers()
    }

    fn n_samples(&self) -> usize {
        self.samples().n_samples()
    }

    fn n_haps(&self) -> usize {
        2 * self.n_samples()
    }
}
