use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::gt::{RefGT, GT};

pub const MIN_STEP_MARKERS: usize = 100;
pub const MAX_STEP_MARKERS: usize = 1500;
const MERGE_GAP_CM: f64 = 4.0;

/// An IBS2 segment: the other sample and the inclusive marker range
/// (high-frequency coordinates) over which the pair's unordered
/// genotypes agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleSeg {
    pub sample: u32,
    pub start: u32,
    pub end: u32,
}

/**
 * IBS2 segment discovery. For every target sample, stores the segments
 * over which it is IBS2 with another sample (target or reference) for
 * at least `min_cm` cM. Segments are found by recursively partitioning
 * the sample set by unordered genotype within genetic windows, then
 * merged, extended marker-by-marker, and length-filtered.
 *
 * Samples with a missing genotype propagate into every partition, and
 * classes whose shared genotype pattern is homozygous at every window
 * marker are discarded.
 */
pub struct Ibs2 {
    segs: Arc<[Box<[SampleSeg]>]>,
}

/// Unordered genotype, or `None` when either allele is missing.
type Geno = Option<(i32, i32)>;

impl Ibs2 {
    pub fn new(
        targ: &dyn GT,
        refr: Option<&RefGT>,
        gen_pos: &[f64],
        min_cm: f64,
    ) -> Ibs2 {
        let n_markers = targ.n_markers();
        let n_targ = targ.n_samples();
        let n_all = n_targ + refr.map_or(0, |r| r.n_samples());
        debug_assert_eq!(gen_pos.len(), n_markers);

        let windows = ibs2_windows(gen_pos, min_cm);
        let window_segs: Vec<Vec<Vec<SampleSeg>>> = windows
            .par_iter()
            .map(|&(start, end)| {
                let genos = read_genos(targ, refr, start, end);
                let classes = partition(&genos, n_all, end - start);
                classes_to_segs(&classes, n_targ, start as u32, (end - 1) as u32)
            })
            .collect();

        // concatenate per-sample segments across windows
        let mut segs: Vec<Vec<SampleSeg>> = vec![Vec::new(); n_targ];
        for ws in window_segs {
            for (s, list) in ws.into_iter().enumerate() {
                segs[s].extend(list);
            }
        }

        let segs: Vec<Box<[SampleSeg]>> = segs
            .into_par_iter()
            .enumerate()
            .map(|(s, mut list)| {
                list.sort_unstable_by_key(|seg| (seg.sample, seg.start, seg.end));
                let mut list = merge(list, gen_pos);
                extend(s, &mut list, targ, refr, n_markers);
                let list = merge(list, gen_pos);
                list.into_iter()
                    .filter(|seg| {
                        gen_pos[seg.end as usize] - gen_pos[seg.start as usize] >= min_cm
                    })
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            })
            .collect();

        Ibs2 { segs: segs.into() }
    }

    /// True when `targ_sample` and `other_sample` lie in a stored IBS2
    /// segment containing `marker`.
    pub fn are_ibs2(&self, targ_sample: usize, other_sample: u32, marker: u32) -> bool {
        self.segs[targ_sample]
            .iter()
            .any(|seg| seg.sample == other_sample && seg.start <= marker && marker <= seg.end)
    }

    pub fn segs(&self, targ_sample: usize) -> &[SampleSeg] {
        &self.segs[targ_sample]
    }
}

/// Splits the markers into windows of at least `min_cm / 2` cM, clamped
/// to `[MIN_STEP_MARKERS, MAX_STEP_MARKERS]` markers.
fn ibs2_windows(gen_pos: &[f64], min_cm: f64) -> Vec<(usize, usize)> {
    let n = gen_pos.len();
    let half = min_cm / 2.0;
    let mut windows = Vec::new();
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n
            && end - start < MAX_STEP_MARKERS
            && !(gen_pos[end - 1] - gen_pos[start] >= half && end - start >= MIN_STEP_MARKERS)
        {
            end += 1;
        }
        windows.push((start, end));
        start = end;
    }
    windows
}

fn geno_at(targ: &dyn GT, refr: Option<&RefGT>, m: usize, sample: usize) -> Geno {
    let n_targ = targ.n_samples();
    let (a1, a2) = if sample < n_targ {
        (targ.allele1(m, sample), targ.allele2(m, sample))
    } else {
        let r = sample - n_targ;
        match refr {
            Some(refr) => (refr.allele1(m, r), refr.allele2(m, r)),
            None => unreachable!(),
        }
    };
    if a1 < 0 || a2 < 0 {
        None
    } else {
        Some((a1.min(a2), a1.max(a2)))
    }
}

/// Genotypes for all samples at markers `[start, end)`, marker-major.
fn read_genos(targ: &dyn GT, refr: Option<&RefGT>, start: usize, end: usize) -> Vec<Vec<Geno>> {
    let n_targ = targ.n_samples();
    let n_all = n_targ + refr.map_or(0, |r| r.n_samples());
    (start..end)
        .map(|m| (0..n_all).map(|s| geno_at(targ, refr, m, s)).collect())
        .collect()
}

/// Recursively partitions the sample set by unordered genotype at each
/// window marker. Returns the surviving classes and whether each saw a
/// heterozygous genotype.
fn partition(genos: &[Vec<Geno>], n_all: usize, n_window_markers: usize) -> Vec<(Vec<u32>, bool)> {
    let mut classes: Vec<(Vec<u32>, bool)> = vec![((0..n_all as u32).collect(), false)];
    for m in 0..n_window_markers {
        let marker_genos = &genos[m];
        let mut next: Vec<(Vec<u32>, bool)> = Vec::with_capacity(classes.len());
        for (class, has_het) in classes {
            let mut groups: FxHashMap<(i32, i32), Vec<u32>> = FxHashMap::default();
            let mut wildcards: Vec<u32> = Vec::new();
            for &s in &class {
                match marker_genos[s as usize] {
                    Some(g) => groups.entry(g).or_default().push(s),
                    None => wildcards.push(s),
                }
            }
            if groups.is_empty() {
                if wildcards.len() >= 2 {
                    next.push((wildcards, has_het));
                }
                continue;
            }
            for ((g1, g2), mut members) in groups {
                members.extend_from_slice(&wildcards);
                if members.len() >= 2 {
                    members.sort_unstable();
                    next.push((members, has_het || g1 != g2));
                }
            }
        }
        classes = next;
        if classes.is_empty() {
            break;
        }
    }
    classes
}

/// Converts surviving non-homozygous classes into per-target-sample
/// window segments.
fn classes_to_segs(
    classes: &[(Vec<u32>, bool)],
    n_targ: usize,
    start: u32,
    end: u32,
) -> Vec<Vec<SampleSeg>> {
    let mut segs: Vec<Vec<SampleSeg>> = vec![Vec::new(); n_targ];
    for (class, has_het) in classes {
        if !has_het {
            continue; // pure-homozygous group
        }
        for &s in class {
            if (s as usize) >= n_targ {
                continue;
            }
            for &o in class {
                if o != s {
                    segs[s as usize].push(SampleSeg {
                        sample: o,
                        start,
                        end,
                    });
                }
            }
        }
    }
    segs
}

/// Merges overlapping or near-adjacent (≤ 4 cM gap) segments on the
/// same other-sample. Input must be sorted by (sample, start).
fn merge(list: Vec<SampleSeg>, gen_pos: &[f64]) -> Vec<SampleSeg> {
    let mut out: Vec<SampleSeg> = Vec::with_capacity(list.len());
    for seg in list {
        match out.last_mut() {
            Some(last)
                if last.sample == seg.sample
                    && (seg.start <= last.end + 1
                        || gen_pos[seg.start as usize] - gen_pos[last.end as usize]
                            <= MERGE_GAP_CM) =>
            {
                last.end = last.end.max(seg.end);
            }
            _ => out.push(seg),
        }
    }
    out
}

/// Extends each segment marker-by-marker while the pair stays
/// unordered-IBS2, without crossing the neighbouring segment for the
/// same pair.
fn extend(
    targ_sample: usize,
    list: &mut [SampleSeg],
    targ: &dyn GT,
    refr: Option<&RefGT>,
    n_markers: usize,
) {
    let compatible = |m: usize, other: u32| -> bool {
        match (
            geno_at(targ, refr, m, targ_sample),
            geno_at(targ, refr, m, other as usize),
        ) {
            (Some(a), Some(b)) => a == b,
            _ => true, // missing matches anything
        }
    };
    for i in 0..list.len() {
        let left_limit = if i > 0 && list[i - 1].sample == list[i].sample {
            list[i - 1].end + 1
        } else {
            0
        };
        let right_limit = if i + 1 < list.len() && list[i + 1].sample == list[i].sample {
            list[i + 1].start - 1
        } else {
            (n_markers - 1) as u32
        };
        let other = list[i].sample;
        while list[i].start > left_limit && compatible(list[i].start as usize - 1, other) {
            list[i].start -= 1;
        }
        while list[i].end < right_limit && compatible(list[i].end as usize + 1, other) {
            list[i].end += 1;
        }
    }
}
