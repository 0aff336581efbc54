use std::sync::Arc;

use rayon::prelude::*;

use crate::gt::{BasicGT, HapsGT, RefGT, RestrictedGT, SplicedGT, GT};
use crate::marker::{GeneticMap, Markers};
use crate::samples::Samples;
use crate::utils::PhaseError;
use crate::window::{MarkerIndices, Window};
use crate::phase::ibs2::Ibs2;

/// Minimum genetic length of a stored IBS2 segment.
pub const MIN_IBS2_CM: f64 = 2.0;

/// Largest high-frequency share of target markers before the window
/// falls back to treating every marker as high-frequency.
const MAX_HI_FREQ_PROP: f64 = 0.9;

/// Carrier classification for one (marker, allele): either the sorted
/// list of target samples carrying the allele, or the high-frequency
/// sentinel when the carrier count exceeds the rare threshold.
#[derive(Clone, Debug)]
pub enum CarrierList {
    HiFreq,
    Carriers(Arc<[u32]>),
}

/**
 * Data fixed for the duration of one window's phasing: the window
 * genotypes composed with the previous window's phased overlap, the
 * marker index maps, per-allele carriers, the high-frequency marker
 * subset with its restricted views, IBS2 segments, and the linear
 * interpolation weights used by stage 2.
 */
pub struct FixedPhaseData {
    pub targ_gt: Arc<dyn GT>,
    pub targ_hi: Arc<RestrictedGT>,
    pub ref_gt: Option<Arc<RefGT>>,
    pub ref_hi: Option<Arc<RefGT>>,
    pub marker_indices: MarkerIndices,
    pub gen_pos: Arc<[f64]>,
    pub carriers: Arc<[Box<[CarrierList]>]>,
    pub max_carriers: usize,
    pub hi_to_targ: Arc<[u32]>,
    pub targ_to_hi: Arc<[i32]>,
    pub hi_markers: Markers,
    pub hi_gen_pos: Arc<[f64]>,
    /// cM distance to the previous high-frequency marker; entry 0 is 0.
    pub gen_dists_hi: Arc<[f64]>,
    pub ibs2: Ibs2,
    pub prev_hi_marker: Arc<[u32]>,
    pub prev_wt: Arc<[f32]>,
    /// True when every marker is treated as high-frequency and stage 2
    /// is skipped.
    pub stage1_only: bool,
    /// Leading markers whose phase is fixed by the previous window.
    pub overlap_phased: usize,
    pub n_targ_samples: usize,
    pub n_haps: usize,
}

impl FixedPhaseData {
    pub fn new(
        window: &Window,
        targ_samples: &Samples,
        ref_samples: Option<&Samples>,
        overlap: Option<HapsGT>,
        map: &GeneticMap,
        rare: f64,
    ) -> Result<FixedPhaseData, PhaseError> {
        let chrom = window.chrom();
        let basic = BasicGT::new(targ_samples.clone(), window.targ_recs.clone())?;
        let overlap_phased = overlap.as_ref().map_or(0, |o| o.n_markers());
        debug_assert!(overlap_phased == 0 || overlap_phased == window.prev_overlap);
        let targ_gt: Arc<dyn GT> = match overlap {
            Some(o) => Arc::new(SplicedGT::new(o, Arc::new(basic))?),
            None => Arc::new(basic),
        };
        let n_markers = targ_gt.n_markers();
        let n_samples = targ_gt.n_samples();

        let marker_indices = match window.ref_mask()? {
            Some(mask) => {
                MarkerIndices::new(&mask, window.ref_prev_overlap, window.ref_next_overlap)
            }
            None => MarkerIndices::new(
                &vec![true; n_markers],
                window.prev_overlap,
                window.next_overlap,
            ),
        };
        if marker_indices.n_targ_markers() != n_markers {
            return Err(PhaseError::Invariant(
                "reference mask does not cover the target markers".to_string(),
            ));
        }
        let ref_gt = match (&window.ref_recs, ref_samples) {
            (Some(recs), Some(samples)) => {
                let full = RefGT::new(samples.clone(), recs.clone())?;
                Some(Arc::new(full.restrict(marker_indices.targ_to_ref_slice())?))
            }
            _ => None,
        };

        let gen_pos: Vec<f64> = (0..n_markers)
            .map(|m| map.gen_pos(chrom, targ_gt.markers().marker(m).pos()))
            .collect();

        let max_carriers = (n_samples as f64 * rare).floor() as usize;
        let carriers: Vec<Box<[CarrierList]>> = (0..n_markers)
            .into_par_iter()
            .map(|m| marker_carriers(targ_gt.as_ref(), m, max_carriers))
            .collect();

        let mut hi_to_targ: Vec<u32> = (0..n_markers)
            .filter(|&m| {
                carriers[m]
                    .iter()
                    .filter(|c| matches!(c, CarrierList::HiFreq))
                    .count()
                    >= 2
            })
            .map(|m| m as u32)
            .collect();
        let mut stage1_only = false;
        if hi_to_targ.len() < 2 || hi_to_targ.len() as f64 > MAX_HI_FREQ_PROP * n_markers as f64 {
            hi_to_targ = (0..n_markers as u32).collect();
            stage1_only = true;
        }
        let mut targ_to_hi = vec![-1i32; n_markers];
        for (h, &m) in hi_to_targ.iter().enumerate() {
            targ_to_hi[m as usize] = h as i32;
        }

        let targ_hi = Arc::new(RestrictedGT::new(targ_gt.clone(), &hi_to_targ)?);
        let ref_hi = match &ref_gt {
            Some(r) => Some(Arc::new(r.restrict(&hi_to_targ)?)),
            None => None,
        };
        let hi_markers = targ_hi.markers().clone();
        let hi_gen_pos: Vec<f64> = hi_to_targ.iter().map(|&m| gen_pos[m as usize]).collect();
        let gen_dists_hi: Vec<f64> = std::iter::once(0.0)
            .chain(hi_gen_pos.windows(2).map(|w| w[1] - w[0]))
            .collect();

        let ibs2 = Ibs2::new(
            targ_hi.as_ref(),
            ref_hi.as_deref(),
            &hi_gen_pos,
            MIN_IBS2_CM,
        );

        let (prev_hi_marker, prev_wt) = interp_weights(&gen_pos, &hi_to_targ, &hi_gen_pos);

        let n_haps = 2 * n_samples + ref_gt.as_ref().map_or(0, |r| r.n_haps());
        info!(
            "window {}: {} markers ({} high-frequency), {} target samples, {} haplotypes",
            window.index,
            n_markers,
            hi_to_targ.len(),
            n_samples,
            n_haps
        );

        Ok(FixedPhaseData {
            targ_gt,
            targ_hi,
            ref_gt,
            ref_hi,
            marker_indices,
            gen_pos: gen_pos.into(),
            carriers: carriers.into(),
            max_carriers,
            hi_to_targ: hi_to_targ.into(),
            targ_to_hi: targ_to_hi.into(),
            hi_markers,
            hi_gen_pos: hi_gen_pos.into(),
            gen_dists_hi: gen_dists_hi.into(),
            ibs2,
            prev_hi_marker: prev_hi_marker.into(),
            prev_wt: prev_wt.into(),
            stage1_only,
            overlap_phased,
            n_targ_samples: n_samples,
            n_haps,
        })
    }

    pub fn n_targ_markers(&self) -> usize {
        self.gen_pos.len()
    }

    pub fn n_hi_markers(&self) -> usize {
        self.hi_to_targ.len()
    }

    pub fn n_targ_haps(&self) -> usize {
        2 * self.n_targ_samples
    }
}

fn marker_carriers(gt: &dyn GT, m: usize, max_carriers: usize) -> Box<[CarrierList]> {
    let n_alleles = gt.markers().marker(m).n_alleles();
    let mut lists: Vec<Vec<u32>> = vec![Vec::new(); n_alleles];
    for s in 0..gt.n_samples() {
        let (a1, a2) = (gt.allele1(m, s), gt.allele2(m, s));
        if a1 >= 0 {
            lists[a1 as usize].push(s as u32);
        }
        if a2 >= 0 && a2 != a1 {
            lists[a2 as usize].push(s as u32);
        }
    }
    lists
        .into_iter()
        .map(|list| {
            if list.len() > max_carriers {
                CarrierList::HiFreq
            } else {
                CarrierList::Carriers(list.into())
            }
        })
        .collect()
}

/// For every target marker, the index of the last high-frequency marker
/// at or before it and the linear interpolation weight toward that
/// marker (1.0 at a high-frequency marker, decaying to 0.0 at the next
/// one).
fn interp_weights(
    gen_pos: &[f64],
    hi_to_targ: &[u32],
    hi_gen_pos: &[f64],
) -> (Vec<u32>, Vec<f32>) {
    let n = gen_pos.len();
    let n_hi = hi_to_targ.len();
    let mut prev = vec![0u32; n];
    let mut wt = vec![1.0f32; n];
    let mut h = 0usize;
    for m in 0..n {
        while h + 1 < n_hi && (hi_to_targ[h + 1] as usize) <= m {
            h += 1;
        }
        if (hi_to_targ[0] as usize) > m {
            // before the first high-frequency marker
            prev[m] = 0;
            wt[m] = 1.0;
            continue;
        }
        prev[m] = h as u32;
        if (hi_to_targ[h] as usize) == m || h + 1 == n_hi {
            wt[m] = 1.0;
        } else {
            let (x0, x1) = (hi_gen_pos[h], hi_gen_pos[h + 1]);
            let dx = x1 - x0;
            wt[m] = if dx > 0.0 {
                ((x1 - gen_pos[m]) / dx) as f32
            } else {
                1.0
            };
        }
    }
    (prev, wt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gt::BasicGTRec;
    use crate::marker::chrom_ids::chrom_index;
    use crate::marker::Marker;

    /// `genos[m][s]` as unordered pairs; biallelic markers 1 Mb apart.
    fn window(genos: &[Vec<(i8, i8)>]) -> (Window, Samples) {
        let chrom = chrom_index("1");
        let n_samples = genos[0].len();
        let names: Vec<String> = (0..n_samples).map(|i| format!("fpd_s{}", i)).collect();
        let samples = Samples::from_names(&names).unwrap();
        let recs: Vec<BasicGTRec> = genos
            .iter()
            .enumerate()
            .map(|(m, g)| {
                let marker = Marker::new(
                    chrom,
                    (m as u32 + 1) * 1_000_000,
                    ".",
                    vec!["A".into(), "C".into()],
                    None,
                )
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
        let window = Window {
            index: 0,
            targ_recs: recs,
            ref_recs: None,
            prev_overlap: 0,
            next_overlap: 0,
            ref_prev_overlap: 0,
            ref_next_overlap: 0,
            last_on_chrom: true,
        };
        (window, samples)
    }

    fn common() -> Vec<(i8, i8)> {
        vec![(0, 1), (1, 1), (0, 0), (0, 1), (1, 1), (0, 0), (0, 1), (1, 0)]
    }

    fn rare() -> Vec<(i8, i8)> {
        let mut g = vec![(0, 0); 8];
        g[3] = (0, 1);
        g
    }

    #[test]
    fn carrier_classification() {
        let (window, samples) = window(&[common(), rare()]);
        // threshold: floor(8 * 0.25) = 2 carriers
        let fpd =
            FixedPhaseData::new(&window, &samples, None, None, &GeneticMap::constant(), 0.25)
                .unwrap();
        assert_eq!(fpd.max_carriers, 2);
        assert!(matches!(fpd.carriers[0][0], CarrierList::HiFreq));
        assert!(matches!(fpd.carriers[0][1], CarrierList::HiFreq));
        match &fpd.carriers[1][1] {
            CarrierList::Carriers(list) => assert_eq!(&**list, &[3u32]),
            _ => panic!("rare allele should carry a list"),
        }
    }

    #[test]
    fn hi_freq_fallback_when_too_few() {
        // every marker rare at the alt allele: fewer than 2 hi-freq markers
        let (window, samples) = window(&[rare(), rare(), rare()]);
        let fpd =
            FixedPhaseData::new(&window, &samples, None, None, &GeneticMap::constant(), 0.25)
                .unwrap();
        assert!(fpd.stage1_only);
        assert_eq!(fpd.n_hi_markers(), 3);
    }

    #[test]
    fn hi_freq_fallback_when_nearly_all() {
        // 10 common markers, 1 rare: 10/11 > 0.9 triggers the fallback
        let mut genos: Vec<Vec<(i8, i8)>> = (0..10).map(|_| common()).collect();
        genos.push(rare());
        let (window1, samples1) = window(&genos);
        let fpd =
            FixedPhaseData::new(&window1, &samples1, None, None, &GeneticMap::constant(), 0.25)
                .unwrap();
        assert!(fpd.stage1_only);
        assert_eq!(fpd.n_hi_markers(), 11);

        // 8 common + 2 rare markers: 8/10 <= 0.9, no fallback
        let mut genos2: Vec<Vec<(i8, i8)>> = (0..8).map(|_| common()).collect();
        genos2.push(rare());
        genos2.push(rare());
        let (window2, samples2) = window(&genos2);
        let fpd =
            FixedPhaseData::new(&window2, &samples2, None, None, &GeneticMap::constant(), 0.25)
                .unwrap();
        assert!(!fpd.stage1_only);
        assert_eq!(fpd.n_hi_markers(), 8);
    }

    #[test]
    fn interpolation_weights() {
        // markers at 1,2,3,4,5 Mb; hi-freq at 1,3,5 (indices 0,2,4)
        let gen_pos = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let hi = vec![0u32, 2, 4];
        let hi_pos = vec![1.0, 3.0, 5.0];
        let (prev, wt) = interp_weights(&gen_pos, &hi, &hi_pos);
        assert_eq!(prev, vec![0, 0, 1, 1, 2]);
        assert_eq!(wt[0], 1.0);
        assert_eq!(wt[2], 1.0);
        assert_eq!(wt[4], 1.0);
        assert!((wt[1] - 0.5).abs() < 1e-6);
        assert!((wt[3] - 0.5).abs() < 1e-6);
    }
}
