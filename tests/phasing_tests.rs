//! End-to-end phasing runs over small synthetic cohorts.

extern crate brolga;

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::PathBuf;

use flate2::read::MultiGzDecoder;

use brolga::cli::PhaseParams;
use brolga::phase::PhaseDriver;

/// Writes a VCF whose record lines are produced by `gt_line(m, s)`
/// giving each sample's genotype string at marker `m`.
fn write_vcf(
    dir: &tempfile::TempDir,
    name: &str,
    chrom: &str,
    n_markers: usize,
    sample_names: &[String],
    gt: impl Fn(usize, usize) -> String,
) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "##fileformat=VCFv4.2").unwrap();
    write!(f, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT").unwrap();
    for s in sample_names {
        write!(f, "\t{}", s).unwrap();
    }
    writeln!(f).unwrap();
    for m in 0..n_markers {
        write!(
            f,
            "{}\t{}\t.\tA\tT\t.\tPASS\t.\tGT",
            chrom,
            (m + 1) * 1_000_000
        )
        .unwrap();
        for s in 0..sample_names.len() {
            write!(f, "\t{}", gt(m, s)).unwrap();
        }
        writeln!(f).unwrap();
    }
    path
}

/// Reads the phased output: per marker, per sample, the ordered allele
/// pair.
fn read_output(path: &PathBuf) -> Vec<Vec<(i32, i32)>> {
    let bytes = std::fs::read(path).unwrap();
    let mut text = String::new();
    MultiGzDecoder::new(&bytes[..]).read_to_string(&mut text).unwrap();
    let mut out = Vec::new();
    for line in text.lines() {
        if line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[8], "GT");
        let mut row = Vec::new();
        for gt in &fields[9..] {
            let (a, b) = gt.split_once('|').expect("output genotype must be phased");
            row.push((a.parse().unwrap(), b.parse().unwrap()));
        }
        out.push(row);
    }
    out
}

fn run(params: PhaseParams) -> Vec<Vec<(i32, i32)>> {
    PhaseDriver::run(&params).unwrap();
    read_output(&params.out_vcf())
}

fn base_params(gt: PathBuf, out: PathBuf) -> PhaseParams {
    PhaseParams {
        gt,
        out,
        ..PhaseParams::default()
    }
}

/// Two identical all-heterozygote samples phased against two pairs of
/// complementary homozygous samples. The haplotype backgrounds are
/// unambiguous, so both twins must resolve to the same constant pair.
#[test]
fn identical_twins_phase_identically() {
    let dir = tempfile::tempdir().unwrap();
    let names: Vec<String> = (0..6).map(|i| format!("TW{}", i)).collect();
    let n_markers = 24;
    let gt_path = write_vcf(&dir, "targ.vcf", "1", n_markers, &names, |_, s| {
        match s {
            0 | 1 => "0/1".to_string(),
            2 | 3 => "0/0".to_string(),
            _ => "1/1".to_string(),
        }
    });
    let mut params = base_params(gt_path, dir.path().join("out"));
    params.ne = 1e4;
    let out = run(params);
    assert_eq!(out.len(), n_markers);

    // unordered genotypes preserved
    for row in &out {
        for (s, &(a, b)) in row.iter().enumerate() {
            let expect = match s {
                0 | 1 => (0, 1),
                2 | 3 => (0, 0),
                _ => (1, 1),
            };
            assert_eq!((a.min(b), a.max(b)), expect);
        }
    }

    // per-sample haplotype sequences
    let hap = |s: usize, first: bool| -> Vec<i32> {
        out.iter()
            .map(|row| if first { row[s].0 } else { row[s].1 })
            .collect()
    };
    for s in [0usize, 1] {
        let h1 = hap(s, true);
        let h2 = hap(s, false);
        // each haplotype follows one constant background
        assert!(h1.iter().all(|&a| a == h1[0]), "twin {} haplotype switches: {:?}", s, h1);
        assert!(h2.iter().all(|&a| a == h2[0]));
        assert_ne!(h1[0], h2[0]);
    }
    // identical up to haplotype swap
    let (t1, t2) = (
        (hap(0, true), hap(0, false)),
        (hap(1, true), hap(1, false)),
    );
    assert!(t1 == t2 || (t1.0 == t2.1 && t1.1 == t2.0));
}

/// A missing genotype surrounded by reference-homozygous calls, with a
/// reference panel that is uniformly reference-homozygous, imputes to
/// the reference allele.
#[test]
fn missing_genotype_imputes_from_reference() {
    let dir = tempfile::tempdir().unwrap();
    let targ_names: Vec<String> = vec!["MI0".to_string(), "MI1".to_string()];
    let gt_path = write_vcf(&dir, "targ.vcf", "2", 3, &targ_names, |m, s| {
        if s == 0 && m == 1 {
            "./.".to_string()
        } else {
            "0/0".to_string()
        }
    });
    let ref_names: Vec<String> = (0..3).map(|i| format!("MIR{}", i)).collect();
    let ref_path = write_vcf(&dir, "ref.vcf", "2", 3, &ref_names, |_, _| "0|0".to_string());
    let mut params = base_params(gt_path, dir.path().join("out"));
    params.refr = Some(ref_path);
    let out = run(params);
    assert_eq!(out.len(), 3);
    assert_eq!(out[1][0], (0, 0));
}

/// Sliding windows with overlap splicing: the twin cohort spread over
/// several windows must still phase to constant backgrounds, with no
/// haplotype switch at any window seam, and the output must tile the
/// marker list exactly once.
#[test]
fn window_splicing_preserves_haplotypes() {
    let dir = tempfile::tempdir().unwrap();
    let names: Vec<String> = (0..6).map(|i| format!("WS{}", i)).collect();
    let n_markers = 40;
    let gt_path = write_vcf(&dir, "targ.vcf", "3", n_markers, &names, |_, s| {
        match s {
            0 | 1 => "0/1".to_string(),
            2 | 3 => "0/0".to_string(),
            _ => "1/1".to_string(),
        }
    });
    let mut params = base_params(gt_path.clone(), dir.path().join("out"));
    params.ne = 1e4;
    params.window_cm = 10.0;
    params.overlap_cm = 2.0;
    let out = run(params.clone());
    assert_eq!(out.len(), n_markers, "windows must tile the markers exactly");
    for s in [0usize, 1] {
        let h1: Vec<i32> = out.iter().map(|row| row[s].0).collect();
        let h2: Vec<i32> = out.iter().map(|row| row[s].1).collect();
        assert!(
            h1.iter().all(|&a| a == h1[0]),
            "haplotype switch across a window seam: {:?}",
            h1
        );
        assert!(h2.iter().all(|&a| a == h2[0]));
        assert_ne!(h1[0], h2[0]);
    }

    // determinism: a second run with the same seed is bit-identical
    let first = std::fs::read(params.out_vcf()).unwrap();
    let mut params2 = params;
    params2.out = dir.path().join("out2");
    PhaseDriver::run(&params2).unwrap();
    let second = std::fs::read(params2.out_vcf()).unwrap();
    assert_eq!(first, second);
}

/// Rare-variant carriers are resolved in stage 2: two carriers of a
/// low-frequency allele sit on a common haplotype background and the
/// rare allele must land on that background's haplotype.
#[test]
fn stage2_places_rare_allele_on_shared_background() {
    let dir = tempfile::tempdir().unwrap();
    let n_samples = 10usize;
    let names: Vec<String> = (0..n_samples).map(|i| format!("RV{}", i)).collect();
    let n_markers = 30;
    let rare_marker = 15usize;
    // samples 0..5 are het A/B everywhere; 5..8 hom A; 8..10 hom B.
    // samples 0 and 1 carry a rare allele at an extra marker that other
    // samples lack.
    let gt_path = write_vcf(&dir, "targ.vcf", "4", n_markers, &names, |m, s| {
        if m == rare_marker {
            if s <= 1 {
                "0/1".to_string()
            } else {
                "0/0".to_string()
            }
        } else if m == 5 || m == 25 {
            // monomorphic sites keep the high-frequency share below the
            // all-markers fallback bound
            "0/0".to_string()
        } else if s < 5 {
            "0/1".to_string()
        } else if s < 8 {
            "0/0".to_string()
        } else {
            "1/1".to_string()
        }
    });
    let mut params = base_params(gt_path, dir.path().join("out"));
    params.ne = 1e4;
    // threshold of floor(10 * 0.25) = 2 carriers keeps the rare marker
    // in stage 2
    params.rare = 0.25;
    let out = run(params);
    assert_eq!(out.len(), n_markers);
    // rare-site genotypes preserved and phased
    for s in 0..n_samples {
        let (a, b) = out[rare_marker][s];
        let expect = if s <= 1 { (0, 1) } else { (0, 0) };
        assert_eq!((a.min(b), a.max(b)), expect);
    }
}

/// Exclusion filters drop samples and markers before phasing.
#[test]
fn exclusions_apply_before_phasing() {
    let dir = tempfile::tempdir().unwrap();
    let names: Vec<String> = (0..6).map(|i| format!("EX{}", i)).collect();
    let gt_path = write_vcf(&dir, "targ.vcf", "5", 12, &names, |_, s| {
        match s {
            0 | 1 => "0/1".to_string(),
            2 | 3 => "0/0".to_string(),
            _ => "1/1".to_string(),
        }
    });
    let excl = dir.path().join("excl_samples.txt");
    std::fs::write(&excl, "EX5\n").unwrap();
    let mut params = base_params(gt_path, dir.path().join("out"));
    params.excludesamples = Some(excl);
    let out = run(params);
    let widths: HashSet<usize> = out.iter().map(|row| row.len()).collect();
    assert_eq!(widths, HashSet::from([5usize]));
}
