use std::sync::Arc;

use crate::gt::{HapsGT, GT};
use crate::marker::Markers;
use crate::samples::Samples;
use crate::utils::PhaseError;

/// A view of another `GT` restricted to a strictly increasing subset of
/// its markers.
#[derive(Clone)]
pub struct RestrictedGT {
    inner: Arc<dyn GT>,
    markers: Markers,
    indices: Arc<[u32]>,
}

impl RestrictedGT {
    pub fn new(inner: Arc<dyn GT>, indices: &[u32]) -> Result<RestrictedGT, PhaseError> {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        let markers = inner.markers().restrict(indices)?;
        Ok(RestrictedGT {
            inner,
            markers,
            indices: indices.into(),
        })
    }
}

impl GT for RestrictedGT {
    fn markers(&self) -> &Markers {
        &self.markers
    }

    fn samples(&self) -> &Samples {
        self.inner.samples()
    }

    fn allele1(&self, marker: usize, sample: usize) -> i32 {
        self.inner.allele1(self.indices[marker] as usize, sample)
    }

    fn allele2(&self, marker: usize, sample: usize) -> i32 {
        self.inner.allele2(self.indices[marker] as usize, sample)
    }

    fn allele(&self, marker: usize, hap: usize) -> i32 {
        self.inner.allele(self.indices[marker] as usize, hap)
    }

    fn is_phased(&self) -> bool {
        self.inner.is_phased()
    }

    fn is_phased_at(&self, marker: usize, sample: usize) -> bool {
        self.inner.is_phased_at(self.indices[marker] as usize, sample)
    }
}

/// Splices a window's leading overlap, already phased by the previous
/// window, onto the raw genotypes for the remaining markers. The first
/// `n_overlap` markers read from the phased overlap haplotypes, the rest
/// from the underlying genotypes.
#[derive(Clone)]
pub struct SplicedGT {
    overlap: HapsGT,
    inner: Arc<dyn GT>,
    n_overlap: usize,
}

impl SplicedGT {
    pub fn new(overlap: HapsGT, inner: Arc<dyn GT>) -> Result<SplicedGT, PhaseError> {
        let n_overlap = overlap.n_markers();
        if n_overlap > inner.n_markers() {
            return Err(PhaseError::Invariant(
                "phased overlap longer than window".to_string(),
            ));
        }
        for m in 0..n_overlap {
            if overlap.markers().marker(m) != inner.markers().marker(m) {
                return Err(PhaseError::DataConsistency(format!(
                    "phased overlap marker {} does not match window marker",
                    overlap.markers().marker(m)
                )));
            }
        }
        if overlap.samples() != inner.samples() {
            return Err(PhaseError::DataConsistency(
                "phased overlap samples do not match window samples".to_string(),
            ));
        }
        Ok(SplicedGT {
            overlap,
            inner,
            n_overlap,
        })
    }

    pub fn n_overlap(&self) -> usize {
        self.n_overlap
    }
}

impl GT for SplicedGT {
    fn markers(&self) -> &Markers {
        self.inner.markers()
    }

    fn samples(&self) -> &Samples {
        self.inner.samples()
    }

    fn allele1(&self, marker: usize, sample: usize) -> i32 {
        if marker < self.n_overlap {
            self.overlap.allele1(marker, sample)
        } else {
            self.inner.allele1(marker, sample)
        }
    }

    fn allele2(&self, marker: usize, sample: usize) -> i32 {
        if marker < self.n_overlap {
            self.overlap.allele2(marker, sample)
        } else {
            self.inner.allele2(marker, sample)
        }
    }

    fn allele(&self, marker: usize, hap: usize) -> i32 {
        if marker < self.n_overlap {
            self.overlap.allele(marker, hap)
        } else {
            self.inner.allele(marker, hap)
        }
    }

    fn is_phased(&self) -> bool {
        self.n_overlap == self.inner.n_markers() || self.inner.is_phased()
    }

    fn is_phased_at(&self, marker: usize, sample: usize) -> bool {
        marker < self.n_overlap || self.inner.is_phased_at(marker, sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gt::basic_gt::{BasicGT, BasicGTRec};
    use crate::marker::chrom_ids::chrom_index;
    use crate::marker::Marker;

    fn target_gt() -> BasicGT {
        let chrom = chrom_index("1");
        let samples = Samples::from_names(&["s1".to_string()]).unwrap();
        let recs = (1..=4u32)
            .map(|p| {
                let marker =
                    Marker::new(chrom, p, ".", vec!["A".into(), "C".into()], None).unwrap();
                BasicGTRec::new(marker, vec![0], vec![1], vec![false]).unwrap()
            })
            .collect();
        BasicGT::new(samples, recs).unwrap()
    }

    #[test]
    fn restriction_remaps_indices() {
        let gt = Arc::new(target_gt());
        let view = RestrictedGT::new(gt.clone(), &[1, 3]).unwrap();
        assert_eq!(view.n_markers(), 2);
        assert_eq!(view.markers().marker(0).pos(), 2);
        assert_eq!(view.markers().marker(1).pos(), 4);
        assert_eq!(view.allele1(1, 0), gt.allele1(3, 0));
    }

    #[test]
    fn splice_prefers_overlap() {
        let gt = Arc::new(target_gt());
        let overlap_markers = gt.markers().restrict(&[0, 1]).unwrap();
        let overlap = HapsGT::from_alleles(
            overlap_markers,
            gt.samples().clone(),
            &[vec![1, 1], vec![0, 0]],
        )
        .unwrap();
        let spliced = SplicedGT::new(overlap, gt).unwrap();
        // overlap region comes from the phased haplotypes
        assert_eq!(spliced.allele1(0, 0), 1);
        assert_eq!(spliced.allele2(0, 0), 0);
        assert!(spliced.is_phased_at(1, 0));
        // tail comes from the raw genotypes
        assert_eq!(spliced.allele1(2, 0), 0);
        assert!(!spliced.is_phased_at(2, 0));
    }
}
