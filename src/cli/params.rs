use std::path::{Path, PathBuf};

use crate::phase::phase_data::PhaseConfig;
use crate::utils::PhaseError;

/// The single-line usage banner printed with every usage error.
pub const USAGE: &str = "usage: brolga gt=<vcf> out=<prefix> [ref=<bref3|vcf>] [map=<plink map>] \
[chrom=<chrom[:start-end]>] [excludesamples=<file>] [excludemarkers=<file>] [burnin=<int>] \
[iterations=<int>] [phase-states=<int>] [phase-step=<cM>] [rare=<freq>] [impute=<bool>] \
[imp-states=<int>] [imp-segment=<cM>] [imp-step=<cM>] [imp-nsteps=<int>] [cluster=<cM>] \
[ap=<bool>] [gp=<bool>] [ne=<float>] [err=<float>] [window=<cM>] [overlap=<cM>] [seed=<int>] \
[nthreads=<int>] [buffer=<cM>]";

/**
 * Run parameters parsed from `key=value` command-line pairs. Unknown
 * keys, malformed values, and out-of-range values are fatal.
 */
#[derive(Clone, Debug)]
pub struct PhaseParams {
    pub gt: PathBuf,
    pub out: PathBuf,
    pub refr: Option<PathBuf>,
    pub map: Option<PathBuf>,
    pub chrom: Option<String>,
    pub excludesamples: Option<PathBuf>,
    pub excludemarkers: Option<PathBuf>,

    pub burnin: usize,
    pub iterations: usize,
    pub phase_states: usize,
    pub phase_step: f64,
    pub rare: f64,

    pub impute: bool,
    pub imp_states: usize,
    pub imp_segment: f64,
    pub imp_step: f64,
    pub imp_nsteps: usize,
    pub cluster: f64,
    pub ap: bool,
    pub gp: bool,

    pub ne: f64,
    pub err: Option<f32>,
    pub window_cm: f64,
    pub overlap_cm: f64,
    pub seed: i64,
    pub nthreads: usize,
    pub buffer_cm: f64,
    /// Programmatic step refinement knob; not a command-line key.
    pub step_scale: f64,
}

impl Default for PhaseParams {
    fn default() -> PhaseParams {
        PhaseParams {
            gt: PathBuf::new(),
            out: PathBuf::new(),
            refr: None,
            map: None,
            chrom: None,
            excludesamples: None,
            excludemarkers: None,
            burnin: 6,
            iterations: 12,
            phase_states: 280,
            phase_step: 0.006,
            rare: 0.0015,
            impute: true,
            imp_states: 1600,
            imp_segment: 6.0,
            imp_step: 0.1,
            imp_nsteps: 7,
            cluster: 0.005,
            ap: false,
            gp: false,
            ne: 1e6,
            err: None,
            window_cm: 40.0,
            overlap_cm: 4.0,
            seed: -99999,
            nthreads: 0,
            buffer_cm: 0.6,
            step_scale: 1.0,
        }
    }
}

fn usage_err(msg: impl Into<String>) -> PhaseError {
    PhaseError::Usage(format!("{}\n{}", msg.into(), USAGE))
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PhaseError> {
    value
        .parse::<T>()
        .map_err(|_| usage_err(format!("invalid value for {}: \"{}\"", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PhaseError> {
    match value {
        "true" | "TRUE" | "True" => Ok(true),
        "false" | "FALSE" | "False" => Ok(false),
        _ => Err(usage_err(format!("invalid value for {}: \"{}\"", key, value))),
    }
}

impl PhaseParams {
    pub fn parse(args: &[String]) -> Result<PhaseParams, PhaseError> {
        let mut p = PhaseParams::default();
        let mut saw_gt = false;
        let mut saw_out = false;
        for arg in args {
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| usage_err(format!("expected key=value pair, found \"{}\"", arg)))?;
            match key {
                "gt" => {
                    p.gt = PathBuf::from(value);
                    saw_gt = true;
                }
                "out" => {
                    p.out = PathBuf::from(value);
                    saw_out = true;
                }
                "ref" => p.refr = Some(PathBuf::from(value)),
                "map" => p.map = Some(PathBuf::from(value)),
                "chrom" => p.chrom = Some(value.to_string()),
                "excludesamples" => p.excludesamples = Some(PathBuf::from(value)),
                "excludemarkers" => p.excludemarkers = Some(PathBuf::from(value)),
                "burnin" => p.burnin = parse_num(key, value)?,
                "iterations" => p.iterations = parse_num(key, value)?,
                "phase-states" => p.phase_states = parse_num(key, value)?,
                "phase-step" => p.phase_step = parse_num(key, value)?,
                "rare" => p.rare = parse_num(key, value)?,
                "impute" => p.impute = parse_bool(key, value)?,
                "imp-states" => p.imp_states = parse_num(key, value)?,
                "imp-segment" => p.imp_segment = parse_num(key, value)?,
                "imp-step" => p.imp_step = parse_num(key, value)?,
                "imp-nsteps" => p.imp_nsteps = parse_num(key, value)?,
                "cluster" => p.cluster = parse_num(key, value)?,
                "ap" => p.ap = parse_bool(key, value)?,
                "gp" => p.gp = parse_bool(key, value)?,
                "ne" => p.ne = parse_num(key, value)?,
                "err" => p.err = Some(parse_num(key, value)?),
                "window" => p.window_cm = parse_num(key, value)?,
                "overlap" => p.overlap_cm = parse_num(key, value)?,
                "seed" => p.seed = parse_num(key, value)?,
                "nthreads" => p.nthreads = parse_num(key, value)?,
                "buffer" => p.buffer_cm = parse_num(key, value)?,
                _ => return Err(usage_err(format!("unknown parameter \"{}\"", key))),
            }
        }
        if !saw_out {
            return Err(usage_err("missing required parameter out=<prefix>"));
        }
        if !saw_gt {
            return Err(usage_err("missing required parameter gt=<vcf>"));
        }
        p.validate()?;
        Ok(p)
    }

    fn validate(&self) -> Result<(), PhaseError> {
        if self.burnin < 1 {
            return Err(usage_err("burnin must be at least 1"));
        }
        if self.iterations < 1 {
            return Err(usage_err("iterations must be at least 1"));
        }
        if self.phase_states < 2 {
            return Err(usage_err("phase-states must be at least 2"));
        }
        if self.phase_step <= 0.0 {
            return Err(usage_err("phase-step must be positive"));
        }
        if !(0.0..=1.0).contains(&self.rare) {
            return Err(usage_err("rare must lie in [0, 1]"));
        }
        if self.ne <= 0.0 {
            return Err(usage_err("ne must be positive"));
        }
        if let Some(err) = self.err {
            if !(0.0..0.5).contains(&err) {
                return Err(usage_err("err must lie in [0, 0.5)"));
            }
        }
        if self.window_cm <= 0.0 || self.overlap_cm < 0.0 {
            return Err(usage_err("window and overlap must be positive"));
        }
        if 1.1 * self.overlap_cm >= self.window_cm {
            return Err(usage_err("window must exceed 1.1 * overlap"));
        }
        if self.buffer_cm < 0.0 {
            return Err(usage_err("buffer must be non-negative"));
        }
        if self.imp_states < 2 || self.imp_segment <= 0.0 || self.imp_step <= 0.0
            || self.imp_nsteps < 1 || self.cluster < 0.0
        {
            return Err(usage_err("imputation parameters out of range"));
        }
        if self.out.is_dir() {
            return Err(usage_err("out must not be a directory"));
        }
        let out_file = self.out_vcf();
        for input in [Some(&self.gt), self.refr.as_ref(), self.map.as_ref()]
            .into_iter()
            .flatten()
        {
            if same_file(&out_file, input) {
                return Err(usage_err("output file may not equal an input file"));
            }
        }
        Ok(())
    }

    /// Path of the phased output VCF.
    pub fn out_vcf(&self) -> PathBuf {
        let mut s = self.out.as_os_str().to_os_string();
        s.push(".vcf.gz");
        PathBuf::from(s)
    }

    pub fn phase_config(&self) -> PhaseConfig {
        PhaseConfig {
            burnin: self.burnin,
            iterations: self.iterations,
            phase_states: self.phase_states,
            phase_step: self.phase_step,
            step_scale: self.step_scale,
            buffer_cm: self.buffer_cm,
            err: self.err,
            ne: self.ne,
            seed: self.seed,
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_and_overrides() {
        let p = PhaseParams::parse(&args(&["gt=in.vcf", "out=run1", "burnin=3", "ne=10000"]))
            .unwrap();
        assert_eq!(p.burnin, 3);
        assert_eq!(p.iterations, 12);
        assert_eq!(p.phase_states, 280);
        assert_eq!(p.ne, 10000.0);
        assert_eq!(p.seed, -99999);
        assert_eq!(p.out_vcf(), PathBuf::from("run1.vcf.gz"));
    }

    #[test]
    fn unknown_key_is_fatal() {
        assert!(PhaseParams::parse(&args(&["gt=a.vcf", "out=o", "bogus=1"])).is_err());
    }

    #[test]
    fn missing_required_keys() {
        assert!(PhaseParams::parse(&args(&["gt=a.vcf"])).is_err());
        assert!(PhaseParams::parse(&args(&["out=o"])).is_err());
    }

    #[test]
    fn window_overlap_constraint() {
        assert!(PhaseParams::parse(&args(&[
            "gt=a.vcf",
            "out=o",
            "window=4.0",
            "overlap=4.0"
        ]))
        .is_err());
        assert!(PhaseParams::parse(&args(&[
            "gt=a.vcf",
            "out=o",
            "window=5.0",
            "overlap=4.0"
        ]))
        .is_ok());
    }

    #[test]
    fn malformed_values() {
        assert!(PhaseParams::parse(&args(&["gt=a.vcf", "out=o", "burnin=x"])).is_err());
        assert!(PhaseParams::parse(&args(&["gt=a.vcf", "out=o", "impute=maybe"])).is_err());
        assert!(PhaseParams::parse(&args(&["gt=a.vcf", "out=o", "rare=1.5"])).is_err());
    }
}
