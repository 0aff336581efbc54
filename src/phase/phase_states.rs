use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::phase::coded_steps::CodedSteps;
use crate::phase::low_freq_phase_ibs::LowFreqPhaseIbs;
use crate::phase::pbwt::PbwtPhaseIbs;
use crate::phase::phase_haps::PhaseHaps;

/// A composite slot's queue entry: the slot's current haplotype and the
/// last step at which it was seen. Ordered by step (oldest first).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompHapSegment {
    pub step: u32,
    pub hap: u32,
    pub slot: u32,
}

impl Ord for CompHapSegment {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.step
            .cmp(&other.step)
            .then_with(|| self.slot.cmp(&other.slot))
            .then_with(|| self.hap.cmp(&other.hap))
    }
}

impl PartialOrd for CompHapSegment {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/**
 * Builds at most `max_states` composite reference haplotypes from a
 * stream of (haplotype, step) IBS events. Each composite slot is a
 * mosaic of haplotype segments joined at step midpoints: when the
 * oldest slot's haplotype has not been seen for `min_steps` steps, it
 * is retired, the splice point is recorded at the midpoint step's first
 * marker, and the slot is reused for the new haplotype.
 */
pub struct PhaseStates {
    max_states: usize,
    min_steps: u32,
    n_hi_markers: usize,
    q: BinaryHeap<Reverse<CompHapSegment>>,
    hap_to_slot: FxHashMap<u32, u32>,
    latest: Vec<u32>,
    cur_hap: Vec<u32>,
    seg_lists: Vec<Vec<(u32, u32)>>,
}

impl PhaseStates {
    pub fn new(max_states: usize, min_steps: u32, n_hi_markers: usize) -> PhaseStates {
        PhaseStates {
            max_states,
            min_steps,
            n_hi_markers,
            q: BinaryHeap::with_capacity(max_states + 1),
            hap_to_slot: FxHashMap::default(),
            latest: vec![0; max_states],
            cur_hap: vec![0; max_states],
            seg_lists: (0..max_states).map(|_| Vec::new()).collect(),
        }
    }

    fn clear(&mut self) {
        self.q.clear();
        self.hap_to_slot.clear();
        for list in &mut self.seg_lists {
            list.clear();
        }
    }

    /// Composite alleles for a sample's haplotype pair:
    /// `al[(m, j)]` receives slot `j`'s allele at high-frequency marker
    /// `m`. Returns the number of states.
    #[allow(clippy::too_many_arguments)]
    pub fn pair_states(
        &mut self,
        haps: &PhaseHaps,
        steps: &CodedSteps,
        pbwt: &PbwtPhaseIbs,
        low_freq: Option<&LowFreqPhaseIbs>,
        sample: usize,
        rng: &mut StdRng,
        al: &mut Array2<u8>,
    ) -> usize {
        self.clear();
        let pair = [2 * sample, 2 * sample + 1];
        for k in 0..steps.n_steps() {
            for &h in &pair {
                self.push_matches(k, h, steps, pbwt, low_freq);
            }
        }
        let n_states = self.finalize(haps, sample, rng);
        self.for_each_segment(|m, j, hap| al[[m, j]] = haps.allele(m, hap as usize) as u8);
        n_states
    }

    /// Composite haplotype indices for a single haplotype's event
    /// stream: `out[(m, j)]` receives slot `j`'s haplotype index at
    /// high-frequency marker `m`.
    pub fn hap_states(
        &mut self,
        haps: &PhaseHaps,
        steps: &CodedSteps,
        pbwt: &PbwtPhaseIbs,
        low_freq: Option<&LowFreqPhaseIbs>,
        hap: usize,
        rng: &mut StdRng,
        out: &mut Array2<i32>,
    ) -> usize {
        self.clear();
        for k in 0..steps.n_steps() {
            self.push_matches(k, hap, steps, pbwt, low_freq);
        }
        let n_states = self.finalize(haps, hap >> 1, rng);
        self.for_each_segment(|m, j, h| out[[m, j]] = h as i32);
        n_states
    }

    fn push_matches(
        &mut self,
        step: usize,
        hap: usize,
        steps: &CodedSteps,
        pbwt: &PbwtPhaseIbs,
        low_freq: Option<&LowFreqPhaseIbs>,
    ) {
        let fwd = pbwt.fwd_match(step, hap);
        if fwd >= 0 {
            self.add_event(fwd as u32, step as u32, steps);
        }
        let bwd = pbwt.bwd_match(step, hap);
        if bwd >= 0 {
            self.add_event(bwd as u32, step as u32, steps);
        }
        if let Some(lf) = low_freq {
            let m = lf.match_hap(step, hap);
            if m >= 0 {
                self.add_event(m as u32, step as u32, steps);
            }
        }
    }

    pub(crate) fn add_event(&mut self, hap: u32, step: u32, steps: &CodedSteps) {
        if let Some(&slot) = self.hap_to_slot.get(&hap) {
            let slot = slot as usize;
            if step > self.latest[slot] {
                self.latest[slot] = step;
            }
            return;
        }
        self.update_head();
        if self.q.len() < self.max_states {
            let slot = self.q.len();
            self.cur_hap[slot] = hap;
            self.latest[slot] = step;
            self.hap_to_slot.insert(hap, slot as u32);
            self.q.push(Reverse(CompHapSegment {
                step,
                hap,
                slot: slot as u32,
            }));
            return;
        }
        let head = self.q.peek().unwrap().0;
        if (head.step as i64) < step as i64 - self.min_steps as i64 {
            self.q.pop();
            let slot = head.slot as usize;
            let old_hap = self.cur_hap[slot];
            let splice_step = ((head.step + step) / 2) as usize;
            let splice_marker = steps.step_start(splice_step) as u32;
            self.seg_lists[slot].push((old_hap, splice_marker));
            self.hap_to_slot.remove(&old_hap);
            self.cur_hap[slot] = hap;
            self.latest[slot] = step;
            self.hap_to_slot.insert(hap, head.slot);
            self.q.push(Reverse(CompHapSegment {
                step,
                hap,
                slot: head.slot,
            }));
        }
        // events arriving while every slot is fresh are dropped
    }

    /// Reinserts stale heads whose slot has since been seen at a later
    /// step.
    fn update_head(&mut self) {
        while let Some(&Reverse(head)) = self.q.peek() {
            let latest = self.latest[head.slot as usize];
            if head.step < latest {
                self.q.pop();
                self.q.push(Reverse(CompHapSegment {
                    step: latest,
                    ..head
                }));
            } else {
                break;
            }
        }
    }

    /// Appends each slot's terminal segment. An empty queue falls back
    /// to random non-self haplotypes spanning the whole window.
    pub(crate) fn finalize(&mut self, haps: &PhaseHaps, sample: usize, rng: &mut StdRng) -> usize {
        let end = self.n_hi_markers as u32;
        if self.q.is_empty() {
            let n_haps = haps.n_haps();
            let n_other = n_haps.saturating_sub(2);
            if n_other == 0 {
                // a lone sample phases against its own pair
                for (slot, h) in [2 * sample, 2 * sample + 1].into_iter().enumerate() {
                    self.seg_lists[slot].clear();
                    self.seg_lists[slot].push((h as u32, end));
                }
                return 2.min(self.max_states);
            }
            let n = self.max_states.min(n_other);
            let mut chosen = Vec::with_capacity(n);
            while chosen.len() < n {
                let h = rng.gen_range(0..n_haps) as u32;
                if h as usize >> 1 == sample || chosen.contains(&h) {
                    continue;
                }
                chosen.push(h);
            }
            for (slot, h) in chosen.into_iter().enumerate() {
                self.seg_lists[slot].clear();
                self.seg_lists[slot].push((h, end));
            }
            return n;
        }
        let n_states = self.q.len();
        for slot in 0..n_states {
            self.seg_lists[slot].push((self.cur_hap[slot], end));
        }
        n_states
    }

    /// Walks every slot's contiguous segments: `f(marker, slot, hap)`.
    pub(crate) fn for_each_segment<F: FnMut(usize, usize, u32)>(&self, mut f: F) {
        for (slot, list) in self.seg_lists.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            let mut start = 0usize;
            for &(hap, seg_end) in list {
                debug_assert!(start <= seg_end as usize);
                for m in start..(seg_end as usize) {
                    f(m, slot, hap);
                }
                start = seg_end as usize;
            }
            debug_assert_eq!(start, self.n_hi_markers);
        }
    }

    pub fn max_states(&self) -> usize {
        self.max_states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// A trivial coded-steps instance whose step `k` starts at marker
    /// `k` (one marker per step).
    fn unit_steps(n: usize) -> CodedSteps {
        use crate::marker::chrom_ids::chrom_index;
        use crate::marker::{Marker, Markers};
        use crate::phase::est_phase::SamplePhase;
        use std::sync::Arc;
        let chrom = chrom_index("1");
        let markers = Markers::new(
            (0..n)
                .map(|m| {
                    Marker::new(chrom, m as u32 + 1, ".", vec!["A".into(), "C".into()], None)
                        .unwrap()
                })
                .collect(),
        )
        .unwrap();
        let mk_phase = |alleles: Vec<i32>| SamplePhase {
            hap1: markers.alleles_to_bits(&alleles).into(),
            hap2: markers.alleles_to_bits(&alleles).into(),
            unphased: Arc::from(Vec::new()),
            missing: Arc::from(Vec::new()),
        };
        let phases: Arc<[SamplePhase]> = vec![mk_phase(vec![0; n]), mk_phase(vec![1; n])].into();
        let hi_to_targ: Arc<[u32]> = (0..n as u32).collect::<Vec<_>>().into();
        let haps = PhaseHaps::new(markers, hi_to_targ, phases, None);
        let pos: Vec<f64> = (0..n).map(|m| m as f64).collect();
        let steps = CodedSteps::new(&haps, &pos, 1.0, 1.0, 999);
        assert_eq!(steps.n_steps(), n);
        steps
    }

    #[test]
    fn capacity_is_bounded_and_coverage_complete() {
        let n_steps = 30usize;
        let steps = unit_steps(n_steps);
        let mut states = PhaseStates::new(2, 3, n_steps);
        // three haplotypes contend for two slots
        for k in 0..n_steps as u32 {
            states.add_event(10 + (k % 3), k, &steps);
            assert!(states.q.len() <= 2);
        }
        // haps reappear within min_steps, so no slot is ever retired
        assert!(states.seg_lists.iter().all(|l| l.is_empty()));
    }

    #[test]
    fn stale_haplotype_is_spliced_out() {
        let n_steps = 40usize;
        let steps = unit_steps(n_steps);
        let mut states = PhaseStates::new(2, 3, n_steps);
        states.add_event(10, 0, &steps);
        states.add_event(11, 0, &steps);
        // hap 12 arrives long after hap 10 and 11 went quiet
        states.add_event(12, 20, &steps);
        let seg: Vec<(u32, u32)> = states
            .seg_lists
            .iter()
            .flat_map(|l| l.iter().copied())
            .collect();
        assert_eq!(seg, vec![(10, 10)]); // splice at step (0 + 20) / 2
        // finalize appends terminal ends covering all markers
        let mut rng = StdRng::seed_from_u64(1);
        let haps = dummy_haps(n_steps);
        let n = states.finalize(&haps, 0, &mut rng);
        assert_eq!(n, 2);
        let mut covered = vec![[false; 2]; n_steps];
        states.for_each_segment(|m, j, _| covered[m][j] = true);
        assert!(covered.iter().all(|row| row[0] && row[1]));
    }

    #[test]
    fn empty_event_stream_falls_back_to_random_states() {
        let n_steps = 5usize;
        let _steps = unit_steps(n_steps);
        let mut states = PhaseStates::new(4, 3, n_steps);
        let haps = dummy_haps(n_steps);
        let mut rng = StdRng::seed_from_u64(2);
        let n = states.finalize(&haps, 0, &mut rng);
        assert_eq!(n, 4.min(haps.n_haps() - 2));
        let mut seen = vec![false; n];
        states.for_each_segment(|_, j, hap| {
            seen[j] = true;
            assert_ne!(hap as usize >> 1, 0, "own haplotype used as state");
        });
        assert!(seen.into_iter().all(|s| s));
    }

    fn dummy_haps(n: usize) -> PhaseHaps {
        use crate::marker::chrom_ids::chrom_index;
        use crate::marker::{Marker, Markers};
        use crate::phase::est_phase::SamplePhase;
        use std::sync::Arc;
        let chrom = chrom_index("1");
        let markers = Markers::new(
            (0..n)
                .map(|m| {
                    Marker::new(chrom, m as u32 + 1, ".", vec!["A".into(), "C".into()], None)
                        .unwrap()
                })
                .collect(),
        )
        .unwrap();
        let mk = |a: i32| SamplePhase {
            hap1: markers.alleles_to_bits(&vec![a; n]).into(),
            hap2: markers.alleles_to_bits(&vec![a; n]).into(),
            unphased: Arc::from(Vec::new()),
            missing: Arc::from(Vec::new()),
        };
        let phases: Arc<[SamplePhase]> = vec![mk(0), mk(1), mk(0), mk(1)].into();
        let hi_to_targ: Arc<[u32]> = (0..n as u32).collect::<Vec<_>>().into();
        PhaseHaps::new(markers, hi_to_targ, phases, None)
    }
}
