use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use rayon::prelude::*;

use crate::bref::Bref3Reader;
use crate::cli::PhaseParams;
use crate::gt::{HapsGT, GT};
use crate::marker::GeneticMap;
use crate::phase::est_phase::{EstPhase, SamplePhase};
use crate::phase::fixed_phase_data::FixedPhaseData;
use crate::phase::hmm;
use crate::phase::impute_baum::{HapImputer, ImputeBaum, PendingAllele};
use crate::phase::phase_baum::PhaseBaum1;
use crate::phase::phase_data::{PhaseConfig, PhaseData};
use crate::phase::recomb;
use crate::samples::Samples;
use crate::utils::PhaseError;
use crate::vcf::reader::read_id_file;
use crate::vcf::{ChromInterval, RefVcfReader, VcfReader, VcfWriter};
use crate::window::{RefPanel, Window, WindowSrc};

const INIT_SALT: u64 = 0x853c_49e6_748f_ea9b;
const STAGE2_SALT: u64 = 0x94d0_49bb_1331_11eb;

fn mix(seed: u64, salt: u64) -> u64 {
    let mut z = seed ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/**
 * The window driver: reads the target (and optional reference) record
 * streams, phases each window through the burn-in and main iterations,
 * runs stage 2 when low-frequency markers exist, splices adjacent
 * windows at their overlap midpoints, and writes the phased records.
 */
pub struct PhaseDriver;

impl PhaseDriver {
    pub fn run(params: &PhaseParams) -> Result<(), PhaseError> {
        let excl_samples = match &params.excludesamples {
            Some(path) => read_id_file(path)?,
            None => HashSet::new(),
        };
        let excl_markers = match &params.excludemarkers {
            Some(path) => read_id_file(path)?,
            None => HashSet::new(),
        };
        let interval = match &params.chrom {
            Some(s) => Some(ChromInterval::parse(s)?),
            None => None,
        };

        let targ = VcfReader::open(
            &params.gt,
            interval.clone(),
            &excl_samples,
            excl_markers.clone(),
        )?;
        let targ_samples = targ.samples().clone();
        info!(
            "target file {}: {} samples",
            params.gt.display(),
            targ_samples.n_samples()
        );

        let refp = match &params.refr {
            Some(path) => {
                let name = path.display().to_string();
                let panel = if name.ends_with(".bref3") {
                    let reader = Bref3Reader::open(path)?;
                    let samples = reader.samples().clone();
                    RefPanel::new(samples, name, Box::new(reader))
                } else {
                    let reader =
                        RefVcfReader::open(path, interval, &excl_samples, excl_markers)?;
                    let samples = reader.samples().clone();
                    RefPanel::new(samples, name, Box::new(reader))
                };
                info!(
                    "reference panel {}: {} samples",
                    path.display(),
                    panel.samples().n_samples()
                );
                Some(panel)
            }
            None => None,
        };
        let ref_samples = refp.as_ref().map(|r| r.samples().clone());
        if let Some(ref_samples) = &ref_samples {
            for name in targ_samples.names() {
                if ref_samples.index_of(&name).is_some() {
                    return Err(PhaseError::DataConsistency(format!(
                        "sample \"{}\" appears in both the target and the reference panel",
                        name
                    )));
                }
            }
        }

        let map = Arc::new(match &params.map {
            Some(path) => GeneticMap::from_plink(path)?,
            None => GeneticMap::constant(),
        });

        let mut src = WindowSrc::new(
            params.gt.display().to_string(),
            Box::new(targ),
            refp,
            map.clone(),
            params.window_cm,
            params.overlap_cm,
        );

        let out_path = params.out_vcf();
        let out_file = BufWriter::new(File::create(&out_path)?);
        let mut writer = VcfWriter::new(out_file, &targ_samples)?;

        let cfg = params.phase_config();
        let seed = params.seed as u64;
        let mut overlap: Option<HapsGT> = None;
        let mut recomb_factor: Option<f32> = None;
        let mut warned_ref_only = false;
        let mut n_windows = 0usize;
        let mut n_emitted = 0usize;
        while let Some(window) = src.next_window()? {
            if let Some(ref_recs) = &window.ref_recs {
                if ref_recs.len() > window.n_targ_markers() && !warned_ref_only {
                    warn!(
                        "markers present only in the reference panel are not imputed into the output"
                    );
                    warned_ref_only = true;
                }
            }
            let window_seed = mix(seed, window.index as u64);
            overlap = Self::phase_window(
                &window,
                &targ_samples,
                ref_samples.as_ref(),
                overlap.take(),
                &cfg,
                &map,
                params.rare,
                &mut recomb_factor,
                window_seed,
                &mut writer,
                &mut n_emitted,
            )?;
            n_windows += 1;
        }
        if n_windows == 0 {
            return Err(PhaseError::DataConsistency(format!(
                "no target markers found in {}",
                params.gt.display()
            )));
        }
        writer.finish()?;
        info!(
            "phased {} markers across {} windows to {}",
            n_emitted,
            n_windows,
            out_path.display()
        );
        Ok(())
    }

    /// Phases one window and writes its spliced output. Returns the
    /// phased haplotypes of the trailing overlap for the next window.
    #[allow(clippy::too_many_arguments)]
    fn phase_window<W: Write>(
        window: &Window,
        targ_samples: &Samples,
        ref_samples: Option<&Samples>,
        overlap: Option<HapsGT>,
        cfg: &PhaseConfig,
        map: &GeneticMap,
        rare: f64,
        recomb_factor: &mut Option<f32>,
        window_seed: u64,
        writer: &mut VcfWriter<W>,
        n_emitted: &mut usize,
    ) -> Result<Option<HapsGT>, PhaseError> {
        let fpd = FixedPhaseData::new(window, targ_samples, ref_samples, overlap, map, rare)?;
        let n_samples = fpd.n_targ_samples;
        let mut est = EstPhase::new(
            fpd.targ_gt.as_ref(),
            fpd.overlap_phased,
            mix(window_seed, INIT_SALT),
        );
        let mut rf = recomb_factor.unwrap_or_else(|| hmm::init_recomb_factor(cfg.ne, fpd.n_haps));

        let n_its = cfg.burnin + cfg.iterations;
        for it in 0..n_its {
            let snapshot = est.snapshot();
            let mut pd = PhaseData::new(&fpd, snapshot.clone(), cfg, it, rf, mix(window_seed, it as u64), false);
            if it + 1 == cfg.burnin || it == cfg.burnin {
                if let Some(beta) = recomb::estimate_recomb_factor(&pd) {
                    rf = beta;
                    pd.set_recomb_factor(beta);
                }
            }
            let new_phases: Vec<SamplePhase> = (0..n_samples)
                .into_par_iter()
                .map_init(
                    || PhaseBaum1::new(&pd),
                    |baum, s| baum.phase_sample(s, &snapshot[s]),
                )
                .collect();
            for (s, phase) in new_phases.into_iter().enumerate() {
                est.set_phase(s, phase);
            }
            debug!(
                "window {} iteration {}/{}: {} unphased hets",
                window.index,
                it + 1,
                n_its,
                est.n_unphased()
            );
        }
        *recomb_factor = Some(rf);

        if !fpd.stage1_only {
            Self::run_stage2(&fpd, cfg, rf, window_seed, &mut est)?;
        }
        if est.n_unphased() > 0 {
            return Err(PhaseError::Invariant(format!(
                "{} heterozygotes left unphased after the final iteration",
                est.n_unphased()
            )));
        }

        // spliced output
        let lo = fpd.marker_indices.prev_splice();
        let hi = fpd.marker_indices.next_splice();
        let markers = fpd.targ_gt.markers();
        let mut buf = vec![(0i32, 0i32); n_samples];
        for m in lo..hi {
            for (s, slot) in buf.iter_mut().enumerate() {
                *slot = (est.allele(m, 2 * s), est.allele(m, 2 * s + 1));
            }
            writer.write_rec(markers.marker(m), &buf)?;
        }
        *n_emitted += hi - lo;

        // trailing overlap for the next window
        if window.next_overlap == 0 {
            return Ok(None);
        }
        let n = markers.n_markers();
        let start = n - window.next_overlap;
        let indices: Vec<u32> = (start as u32..n as u32).collect();
        let ov_markers = markers.restrict(&indices)?;
        let hap_alleles: Vec<Vec<i32>> = (0..2 * n_samples)
            .map(|h| (start..n).map(|m| est.allele(m, h)).collect())
            .collect();
        Ok(Some(HapsGT::from_alleles(
            ov_markers,
            targ_samples.clone(),
            &hap_alleles,
        )?))
    }

    /// Stage 2: resolve the low-frequency heterozygotes and missing
    /// alleles, then run the second pass over deferred alleles.
    fn run_stage2(
        fpd: &FixedPhaseData,
        cfg: &PhaseConfig,
        rf: f32,
        window_seed: u64,
        est: &mut EstPhase,
    ) -> Result<(), PhaseError> {
        let n_samples = fpd.n_targ_samples;
        let n_its = cfg.burnin + cfg.iterations;
        let snapshot = est.snapshot();
        let pd = PhaseData::new(
            fpd,
            snapshot.clone(),
            cfg,
            n_its - 1,
            rf,
            mix(window_seed, STAGE2_SALT),
            true,
        );
        let results = (0..n_samples)
            .into_par_iter()
            .map_init(
                || ImputeBaum::new(&pd),
                |baum, s| baum.impute_sample(s, &snapshot[s]),
            )
            .collect::<Vec<_>>();

        let markers = est.markers().clone();
        let mut pendings: Vec<PendingAllele> = Vec::new();
        for result in results {
            let s = result.sample as usize;
            let prev = est.phase(s);
            if result.sites.is_empty() && prev.unphased.is_empty() {
                pendings.extend(result.pending);
                continue;
            }
            let mut bits1 = prev.hap1.to_vec();
            let mut bits2 = prev.hap2.to_vec();
            for &(m, a1, a2) in &result.sites {
                markers.set_allele(&mut bits1, m as usize, a1);
                markers.set_allele(&mut bits2, m as usize, a2);
            }
            let new = SamplePhase {
                hap1: bits1.into(),
                hap2: bits2.into(),
                unphased: Arc::from(Vec::new()),
                missing: prev.missing.clone(),
            };
            est.set_phase(s, new);
            pendings.extend(result.pending);
        }
        if !pendings.is_empty() {
            debug!("second-pass imputation of {} deferred alleles", pendings.len());
            HapImputer::new(pendings).impute(est);
        }
        Ok(())
    }
}
