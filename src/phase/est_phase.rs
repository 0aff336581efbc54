use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::gt::GT;
use crate::marker::Markers;
use crate::samples::Samples;

/**
 * One target sample's current phase estimate: the haplotype pair as
 * packed bit arrays over all window target markers, the strictly
 * increasing list of marker indices whose heterozygote ordering is
 * still undetermined, and the list of markers with a missing genotype.
 *
 * Values are immutable; an iteration publishes a whole replacement
 * `SamplePhase` which the driver commits at the iteration barrier. The
 * unphased list only ever shrinks.
 */
#[derive(Clone)]
pub struct SamplePhase {
    pub hap1: Arc<[u64]>,
    pub hap2: Arc<[u64]>,
    pub unphased: Arc<[u32]>,
    pub missing: Arc<[u32]>,
}

/// The per-window mutable phasing state: one `SamplePhase` per target
/// sample.
pub struct EstPhase {
    markers: Markers,
    samples: Samples,
    phases: Vec<SamplePhase>,
}

impl EstPhase {
    /**
     * Initialises the estimate from the window genotypes: heterozygote
     * order is randomised, missing alleles are drawn from the sample
     * allele frequencies as a baseline, and the first `phased_prefix`
     * markers (the overlap phased by the previous window) are taken as
     * given and excluded from the unphased and missing lists.
     */
    pub fn new(gt: &dyn GT, phased_prefix: usize, seed: u64) -> EstPhase {
        let markers = gt.markers().clone();
        let n_markers = markers.n_markers();
        let n_samples = gt.n_samples();

        // per-marker allele counts for frequency-based imputation
        let mut freqs: Vec<Vec<u32>> = (0..n_markers)
            .map(|m| vec![0u32; markers.marker(m).n_alleles()])
            .collect();
        for m in 0..n_markers {
            let counts = &mut freqs[m];
            for s in 0..n_samples {
                for a in [gt.allele1(m, s), gt.allele2(m, s)] {
                    if a >= 0 {
                        counts[a as usize] += 1;
                    }
                }
            }
        }

        let phases = (0..n_samples)
            .map(|s| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(s as u64));
                let mut a1 = vec![0i32; n_markers];
                let mut a2 = vec![0i32; n_markers];
                let mut unphased = Vec::new();
                let mut missing = Vec::new();
                for m in 0..n_markers {
                    let (g1, g2) = (gt.allele1(m, s), gt.allele2(m, s));
                    if m < phased_prefix {
                        a1[m] = g1;
                        a2[m] = g2;
                        continue;
                    }
                    if g1 < 0 || g2 < 0 {
                        a1[m] = if g1 >= 0 { g1 } else { sample_allele(&freqs[m], &mut rng) };
                        a2[m] = if g2 >= 0 { g2 } else { sample_allele(&freqs[m], &mut rng) };
                        missing.push(m as u32);
                    } else if g1 != g2 {
                        if rng.gen::<bool>() {
                            a1[m] = g1;
                            a2[m] = g2;
                        } else {
                            a1[m] = g2;
                            a2[m] = g1;
                        }
                        unphased.push(m as u32);
                    } else {
                        a1[m] = g1;
                        a2[m] = g2;
                    }
                }
                SamplePhase {
                    hap1: markers.alleles_to_bits(&a1).into(),
                    hap2: markers.alleles_to_bits(&a2).into(),
                    unphased: unphased.into(),
                    missing: missing.into(),
                }
            })
            .collect();

        EstPhase {
            markers,
            samples: gt.samples().clone(),
            phases,
        }
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.phases.len()
    }

    pub fn phase(&self, sample: usize) -> &SamplePhase {
        &self.phases[sample]
    }

    /// Replaces a sample's phase. The new unphased list must be a
    /// subset of the old one.
    pub fn set_phase(&mut self, sample: usize, phase: SamplePhase) {
        debug_assert!(is_subset(&phase.unphased, &self.phases[sample].unphased));
        self.phases[sample] = phase;
    }

    /// A start-of-iteration snapshot. Cloning shares the per-sample
    /// arrays, so the snapshot is cheap and immutable.
    pub fn snapshot(&self) -> Arc<[SamplePhase]> {
        self.phases.clone().into()
    }

    pub fn allele(&self, marker: usize, hap: usize) -> i32 {
        let phase = &self.phases[hap >> 1];
        let bits = if hap & 1 == 0 { &phase.hap1 } else { &phase.hap2 };
        self.markers.allele_from_bits(bits, marker)
    }

    pub fn n_unphased(&self) -> usize {
        self.phases.iter().map(|p| p.unphased.len()).sum()
    }

    pub fn n_missing(&self) -> usize {
        self.phases.iter().map(|p| p.missing.len()).sum()
    }
}

fn sample_allele(counts: &[u32], rng: &mut StdRng) -> i32 {
    let total: u32 = counts.iter().sum();
    if total == 0 {
        return 0;
    }
    let mut draw = rng.gen_range(0..total);
    for (a, &c) in counts.iter().enumerate() {
        if draw < c {
            return a as i32;
        }
        draw -= c;
    }
    (counts.len() - 1) as i32
}

fn is_subset(sub: &[u32], sup: &[u32]) -> bool {
    let mut i = 0;
    for &x in sub {
        while i < sup.len() && sup[i] < x {
            i += 1;
        }
        if i == sup.len() || sup[i] != x {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gt::{BasicGT, BasicGTRec};
    use crate::marker::chrom_ids::chrom_index;
    use crate::marker::Marker;

    fn gt() -> BasicGT {
        let chrom = chrom_index("1");
        let samples = Samples::from_names(&["s1".to_string(), "s2".to_string()]).unwrap();
        let gts: [&[(i8, i8)]; 3] = [&[(0, 1), (0, 0)], &[(-1, -1), (1, 1)], &[(1, 0), (0, 1)]];
        let recs = gts
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let marker = Marker::new(chrom, i as u32 + 1, ".", vec!["A".into(), "C".into()], None)
                    .unwrap();
                BasicGTRec::new(
                    marker,
                    g.iter().map(|x| x.0).collect(),
                    g.iter().map(|x| x.1).collect(),
                    vec![false; g.len()],
                )
                .unwrap()
            })
            .collect();
        BasicGT::new(samples, recs).unwrap()
    }

    #[test]
    fn init_preserves_genotypes_and_tracks_lists() {
        let gt = gt();
        let est = EstPhase::new(&gt, 0, 7);
        // sample 0: het at markers 0 and 2, missing at 1
        assert_eq!(&*est.phase(0).unphased, &[0, 2]);
        assert_eq!(&*est.phase(0).missing, &[1]);
        // unordered genotypes preserved where called
        let (a1, a2) = (est.allele(0, 0), est.allele(0, 1));
        assert_eq!((a1.min(a2), a1.max(a2)), (0, 1));
        // sample 1 fully called, hom at 0 and 1
        assert_eq!(est.phase(1).unphased.len(), 1);
        assert_eq!(est.phase(1).missing.len(), 0);
        assert_eq!(est.allele(1, 2), 1);
        assert_eq!(est.allele(1, 3), 1);
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let gt = gt();
        let a = EstPhase::new(&gt, 0, 42);
        let b = EstPhase::new(&gt, 0, 42);
        for s in 0..2 {
            assert_eq!(&*a.phase(s).hap1, &*b.phase(s).hap1);
            assert_eq!(&*a.phase(s).hap2, &*b.phase(s).hap2);
        }
    }

    #[test]
    fn phased_prefix_is_fixed() {
        let gt = gt();
        let est = EstPhase::new(&gt, 1, 7);
        // marker 0 is part of the phased prefix: order taken as given
        assert_eq!(est.allele(0, 0), 0);
        assert_eq!(est.allele(0, 1), 1);
        assert_eq!(&*est.phase(0).unphased, &[2]);
    }
}
