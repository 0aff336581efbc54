use std::sync::Arc;

use crate::gt::{RefGT, GT};
use crate::marker::Markers;
use crate::phase::est_phase::SamplePhase;

/**
 * The haplotypes visible to one phasing iteration at the high-frequency
 * markers: the start-of-iteration snapshot of every target sample's
 * estimated haplotype pair, followed by the reference panel haplotypes.
 * Target haplotypes come first, so haplotype `h` belongs to combined
 * sample `h / 2`.
 */
#[derive(Clone)]
pub struct PhaseHaps {
    full_markers: Markers,
    hi_to_targ: Arc<[u32]>,
    phases: Arc<[SamplePhase]>,
    ref_hi: Option<Arc<RefGT>>,
    n_targ_haps: usize,
    n_haps: usize,
}

impl PhaseHaps {
    pub fn new(
        full_markers: Markers,
        hi_to_targ: Arc<[u32]>,
        phases: Arc<[SamplePhase]>,
        ref_hi: Option<Arc<RefGT>>,
    ) -> PhaseHaps {
        let n_targ_haps = 2 * phases.len();
        let n_haps = n_targ_haps + ref_hi.as_ref().map_or(0, |r| r.n_haps());
        PhaseHaps {
            full_markers,
            hi_to_targ,
            phases,
            ref_hi,
            n_targ_haps,
            n_haps,
        }
    }

    pub fn n_hi_markers(&self) -> usize {
        self.hi_to_targ.len()
    }

    pub fn n_targ_haps(&self) -> usize {
        self.n_targ_haps
    }

    pub fn n_haps(&self) -> usize {
        self.n_haps
    }

    /// Combined sample index owning haplotype `hap`.
    #[inline]
    pub fn sample(&self, hap: usize) -> u32 {
        (hap >> 1) as u32
    }

    /// Allele of haplotype `hap` at high-frequency marker `hi_m`.
    #[inline]
    pub fn allele(&self, hi_m: usize, hap: usize) -> i32 {
        if hap < self.n_targ_haps {
            let phase = &self.phases[hap >> 1];
            let bits = if hap & 1 == 0 { &phase.hap1 } else { &phase.hap2 };
            self.full_markers
                .allele_from_bits(bits, self.hi_to_targ[hi_m] as usize)
        } else {
            self.ref_hi
                .as_ref()
                .unwrap()
                .allele(hi_m, hap - self.n_targ_haps)
        }
    }

    pub fn phases(&self) -> &Arc<[SamplePhase]> {
        &self.phases
    }
}
