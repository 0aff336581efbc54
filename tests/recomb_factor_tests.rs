//! Recombination-factor self-calibration on a synthetic cohort whose
//! haplotypes switch backgrounds at known points.

extern crate brolga;

use brolga::gt::BasicGTRec;
use brolga::marker::chrom_ids::chrom_index;
use brolga::marker::{GeneticMap, Marker};
use brolga::phase::est_phase::EstPhase;
use brolga::phase::fixed_phase_data::FixedPhaseData;
use brolga::phase::phase_data::{PhaseConfig, PhaseData};
use brolga::phase::recomb::estimate_recomb_factor;
use brolga::samples::Samples;
use brolga::window::Window;

#[test]
fn regression_recovers_a_positive_finite_factor() {
    let chrom = chrom_index("11");
    let n_samples = 40usize;
    let n_markers = 60usize;
    let names: Vec<String> = (0..n_samples).map(|i| format!("RC{:03}", i)).collect();
    let samples = Samples::from_names(&names).unwrap();

    // alternating short and long genetic gaps give the regression a
    // spread of x values
    let mut positions = Vec::with_capacity(n_markers);
    let mut pos = 1_000_000u32;
    for m in 0..n_markers {
        positions.push(pos);
        pos += if m % 2 == 0 { 500_000 } else { 2_000_000 };
    }

    // samples 0..10 stay on background A, 10..20 on background B, the
    // rest switch from A to B at sample-specific markers
    let allele = |m: usize, s: usize| -> i8 {
        if s < 10 {
            0
        } else if s < 20 {
            1
        } else {
            let switch = 20 + (s * 3) % 20;
            if m < switch {
                0
            } else {
                1
            }
        }
    };
    let recs: Vec<BasicGTRec> = (0..n_markers)
        .map(|m| {
            let marker = Marker::new(
                chrom,
                positions[m],
                ".",
                vec!["A".to_string(), "G".to_string()],
                None,
            )
            .unwrap();
            let a: Vec<i8> = (0..n_samples).map(|s| allele(m, s)).collect();
            BasicGTRec::new(marker, a.clone(), a, vec![false; n_samples]).unwrap()
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

    let map = GeneticMap::constant();
    let fpd = FixedPhaseData::new(&window, &samples, None, None, &map, 0.0015).unwrap();
    let est = EstPhase::new(fpd.targ_gt.as_ref(), 0, 11);
    let cfg = PhaseConfig {
        phase_states: 40,
        ..PhaseConfig::default()
    };
    let pd = PhaseData::new(&fpd, est.snapshot(), &cfg, 0, 1.0, 2024, false);

    let beta = estimate_recomb_factor(&pd).expect("regression should produce an update");
    assert!(beta.is_finite());
    assert!(beta > 0.0);
    // the factor stays within a plausible scale for cM distances
    assert!(beta < 1e3, "slope {} implausibly large", beta);
}
