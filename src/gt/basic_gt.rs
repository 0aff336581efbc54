use std::sync::Arc;

use crate::gt::GT;
use crate::marker::{Marker, Markers};
use crate::samples::Samples;
use crate::utils::PhaseError;

/**
 * One marker's hard-called genotypes for a list of samples. Alleles are
 * stored per sample as a pair of signed bytes (`-1` = missing) plus a
 * phased flag. Records are immutable once built.
 */
#[derive(Clone, Debug)]
pub struct BasicGTRec {
    marker: Marker,
    allele1: Arc<[i8]>,
    allele2: Arc<[i8]>,
    phased: Arc<[bool]>,
}

impl BasicGTRec {
    pub fn new(
        marker: Marker,
        allele1: Vec<i8>,
        allele2: Vec<i8>,
        phased: Vec<bool>,
    ) -> Result<BasicGTRec, PhaseError> {
        if allele1.len() != allele2.len() || allele1.len() != phased.len() {
            return Err(PhaseError::Invariant(format!(
                "inconsistent genotype array lengths at {}",
                marker
            )));
        }
        let n_alleles = marker.n_alleles() as i8;
        for (&a1, &a2) in allele1.iter().zip(allele2.iter()) {
            if a1 >= n_alleles || a2 >= n_alleles || a1 < -1 || a2 < -1 {
                return Err(PhaseError::DataConsistency(format!(
                    "allele index out of range at {}",
                    marker
                )));
            }
        }
        Ok(BasicGTRec {
            marker,
            allele1: allele1.into(),
            allele2: allele2.into(),
            phased: phased.into(),
        })
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    pub fn n_samples(&self) -> usize {
        self.allele1.len()
    }

    pub fn allele1(&self, sample: usize) -> i32 {
        self.allele1[sample] as i32
    }

    pub fn allele2(&self, sample: usize) -> i32 {
        self.allele2[sample] as i32
    }

    pub fn is_phased(&self, sample: usize) -> bool {
        self.phased[sample]
    }

    pub fn is_missing(&self, sample: usize) -> bool {
        self.allele1[sample] < 0 || self.allele2[sample] < 0
    }

    pub fn is_het(&self, sample: usize) -> bool {
        let (a1, a2) = (self.allele1[sample], self.allele2[sample]);
        a1 >= 0 && a2 >= 0 && a1 != a2
    }
}

/// Target genotypes for one window: a record per marker.
#[derive(Clone)]
pub struct BasicGT {
    markers: Markers,
    samples: Samples,
    recs: Arc<[BasicGTRec]>,
}

impl BasicGT {
    pub fn new(samples: Samples, recs: Vec<BasicGTRec>) -> Result<BasicGT, PhaseError> {
        let markers = Markers::new(recs.iter().map(|r| r.marker().clone()).collect())?;
        for rec in &recs {
            if rec.n_samples() != samples.n_samples() {
                return Err(PhaseError::Invariant(format!(
                    "record at {} has {} samples, expected {}",
                    rec.marker(),
                    rec.n_samples(),
                    samples.n_samples()
                )));
            }
        }
        Ok(BasicGT {
            markers,
            samples,
            recs: recs.into(),
        })
    }

    pub fn rec(&self, marker: usize) -> &BasicGTRec {
        &self.recs[marker]
    }
}

impl GT for BasicGT {
    fn markers(&self) -> &Markers {
        &self.markers
    }

    fn samples(&self) -> &Samples {
        &self.samples
    }

    fn allele1(&self, marker: usize, sample: usize) -> i32 {
        self.recs[marker].allele1(sample)
    }

    fn allele2(&self, marker: usize, sample: usize) -> i32 {
        self.recs[marker].allele2(sample)
    }

    fn is_phased(&self) -> bool {
        false
    }

    fn is_phased_at(&self, marker: usize, sample: usize) -> bool {
        self.recs[marker].is_phased(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::chrom_ids::chrom_index;

    fn rec(pos: u32, gts: &[(i8, i8)]) -> BasicGTRec {
        let marker = Marker::new(
            chrom_index("1"),
            pos,
            ".",
            vec!["A".to_string(), "C".to_string()],
            None,
        )
        .unwrap();
        BasicGTRec::new(
            marker,
            gts.iter().map(|g| g.0).collect(),
            gts.iter().map(|g| g.1).collect(),
            vec![false; gts.len()],
        )
        .unwrap()
    }

    #[test]
    fn accessors() {
        let samples = Samples::from_names(&["a".to_string(), "b".to_string()]).unwrap();
        let gt = BasicGT::new(samples, vec![rec(1, &[(0, 1), (-1, -1)])]).unwrap();
        assert_eq!(gt.allele1(0, 0), 0);
        assert_eq!(gt.allele2(0, 0), 1);
        assert_eq!(gt.allele(0, 1), 1);
        assert!(gt.rec(0).is_het(0));
        assert!(gt.rec(0).is_missing(1));
        assert!(!gt.is_phased());
    }

    #[test]
    fn out_of_range_allele_rejected() {
        let marker = Marker::new(0, 5, ".", vec!["A".to_string(), "C".to_string()], None).unwrap();
        assert!(BasicGTRec::new(marker, vec![2], vec![0], vec![false]).is_err());
    }
}
