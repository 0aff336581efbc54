use std::sync::Arc;

use crate::gt::GT;
use crate::marker::Markers;
use crate::samples::Samples;
use crate::utils::PhaseError;

/// Phased haplotypes stored as one packed bit array per haplotype.
#[derive(Clone)]
pub struct HapsGT {
    markers: Markers,
    samples: Samples,
    haps: Arc<[Arc<[u64]>]>,
}

impl HapsGT {
    pub fn new(
        markers: Markers,
        samples: Samples,
        haps: Vec<Arc<[u64]>>,
    ) -> Result<HapsGT, PhaseError> {
        if haps.len() != samples.n_haps() {
            return Err(PhaseError::Invariant(format!(
                "{} packed haplotypes for {} samples",
                haps.len(),
                samples.n_samples()
            )));
        }
        let words = markers.seq_words();
        if haps.iter().any(|h| h.len() != words) {
            return Err(PhaseError::Invariant(
                "packed haplotype has wrong word count".to_string(),
            ));
        }
        Ok(HapsGT {
            markers,
            samples,
            haps: haps.into(),
        })
    }

    pub fn from_alleles(
        markers: Markers,
        samples: Samples,
        hap_alleles: &[Vec<i32>],
    ) -> Result<HapsGT, PhaseError> {
        let haps: Vec<Arc<[u64]>> = hap_alleles
            .iter()
            .map(|a| Arc::from(markers.alleles_to_bits(a)))
            .collect();
        HapsGT::new(markers, samples, haps)
    }

    pub fn hap_bits(&self, hap: usize) -> &Arc<[u64]> {
        &self.haps[hap]
    }
}

impl GT for HapsGT {
    fn markers(&self) -> &Markers {
        &self.markers
    }

    fn samples(&self) -> &Samples {
        &self.samples
    }

    fn allele1(&self, marker: usize, sample: usize) -> i32 {
        self.markers.allele_from_bits(&self.haps[2 * sample], marker)
    }

    fn allele2(&self, marker: usize, sample: usize) -> i32 {
        self.markers.allele_from_bits(&self.haps[2 * sample + 1], marker)
    }

    fn allele(&self, marker: usize, hap: usize) -> i32 {
        self.markers.allele_from_bits(&self.haps[hap], marker)
    }

    fn is_phased(&self) -> bool {
        true
    }

    fn is_phased_at(&self, _marker: usize, _sample: usize) -> bool {
        true
    }
}
