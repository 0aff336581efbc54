use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::gt::{BasicGTRec, RefGTRec};
use crate::marker::{chrom_ids, Marker};
use crate::samples::Samples;
use crate::utils::PhaseError;

/// A `chrom` or `chrom:start-end` restriction (1-based, inclusive).
#[derive(Clone, Debug)]
pub struct ChromInterval {
    pub chrom: String,
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl ChromInterval {
    pub fn parse(s: &str) -> Result<ChromInterval, PhaseError> {
        if let Some((chrom, range)) = s.rsplit_once(':') {
            let err = || {
                PhaseError::Usage(format!(
                    "invalid chrom parameter \"{}\": expected chrom or chrom:start-end",
                    s
                ))
            };
            let (start, end) = range.split_once('-').ok_or_else(err)?;
            let start: u32 = start.parse().map_err(|_| err())?;
            let end: u32 = end.parse().map_err(|_| err())?;
            if chrom.is_empty() || start > end {
                return Err(err());
            }
            Ok(ChromInterval {
                chrom: chrom.to_string(),
                start: Some(start),
                end: Some(end),
            })
        } else {
            Ok(ChromInterval {
                chrom: s.to_string(),
                start: None,
                end: None,
            })
        }
    }

    fn contains(&self, chrom: &str, pos: u32) -> bool {
        chrom == self.chrom
            && self.start.map_or(true, |s| pos >= s)
            && self.end.map_or(true, |e| pos <= e)
    }
}

/// Reads one identifier per line; empty lines ignored.
pub fn read_id_file(path: &Path) -> Result<HashSet<String>, PhaseError> {
    let reader = BufReader::new(File::open(path)?);
    let mut ids = HashSet::new();
    for line in reader.lines() {
        let line = line?;
        let id = line.trim();
        if !id.is_empty() {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

fn open_text(path: &Path) -> Result<Box<dyn BufRead + Send>, PhaseError> {
    let file = File::open(path)?;
    let name = path.to_string_lossy();
    if name.ends_with(".gz") || name.ends_with(".bgz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
            file,
        )))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/**
 * A VCF 4.x reader producing hard-called genotype records. The GT field
 * must be the first FORMAT field; `.` denotes a missing allele, `/`
 * separates unphased and `|` phased alleles. Sample, marker, and
 * chromosome filters are applied before genotype tokenisation.
 */
pub struct VcfReader {
    file_name: String,
    lines: std::io::Lines<Box<dyn BufRead + Send>>,
    line_no: u64,
    samples: Samples,
    keep_cols: Vec<usize>,
    chrom: Option<ChromInterval>,
    excl_markers: HashSet<String>,
}

impl VcfReader {
    pub fn open(
        path: &Path,
        chrom: Option<ChromInterval>,
        excl_samples: &HashSet<String>,
        excl_markers: HashSet<String>,
    ) -> Result<VcfReader, PhaseError> {
        let file_name = path.display().to_string();
        let mut lines = open_text(path)?.lines();
        let mut line_no = 0u64;
        loop {
            let line = match lines.next() {
                Some(line) => line?,
                None => {
                    return Err(PhaseError::format(
                        &file_name,
                        None,
                        "missing #CHROM header line",
                    ))
                }
            };
            line_no += 1;
            if line.starts_with("##") {
                continue;
            }
            if line.starts_with("#CHROM") {
                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() < 10 {
                    return Err(PhaseError::format(
                        &file_name,
                        Some(line_no),
                        "header line has no sample columns",
                    ));
                }
                let names = &fields[9..];
                let mut keep_cols = Vec::new();
                let mut kept_names = Vec::new();
                for (i, name) in names.iter().enumerate() {
                    if !excl_samples.contains(*name) {
                        keep_cols.push(i);
                        kept_names.push(name.to_string());
                    }
                }
                if keep_cols.is_empty() {
                    return Err(PhaseError::format(
                        &file_name,
                        Some(line_no),
                        "no samples remain after exclusions",
                    ));
                }
                let samples = Samples::from_names(&kept_names)?;
                return Ok(VcfReader {
                    file_name,
                    lines,
                    line_no,
                    samples,
                    keep_cols,
                    chrom,
                    excl_markers,
                });
            }
            return Err(PhaseError::format(
                &file_name,
                Some(line_no),
                "expected ## meta line or #CHROM header",
            ));
        }
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    fn format_err(&self, msg: impl Into<String>) -> PhaseError {
        PhaseError::format(&self.file_name, Some(self.line_no), msg)
    }

    fn parse_rec(&mut self, line: &str) -> Result<Option<BasicGTRec>, PhaseError> {
        let mut fields = line.split('\t');
        let chrom = fields
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| self.format_err("missing CHROM field"))?;
        let pos: u32 = fields
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| self.format_err("invalid POS field"))?;
        if let Some(interval) = &self.chrom {
            if !interval.contains(chrom, pos) {
                return Ok(None);
            }
        }
        let id = fields.next().ok_or_else(|| self.format_err("truncated record"))?;
        if !self.excl_markers.is_empty() {
            let excluded = id.split(';').any(|i| self.excl_markers.contains(i))
                || self.excl_markers.contains(&format!("{}:{}", chrom, pos));
            if excluded {
                return Ok(None);
            }
        }
        let ref_allele = fields.next().ok_or_else(|| self.format_err("truncated record"))?;
        let alt = fields.next().ok_or_else(|| self.format_err("truncated record"))?;
        let _qual = fields.next().ok_or_else(|| self.format_err("truncated record"))?;
        let _filter = fields.next().ok_or_else(|| self.format_err("truncated record"))?;
        let info = fields.next().ok_or_else(|| self.format_err("truncated record"))?;
        let format = fields.next().ok_or_else(|| self.format_err("truncated record"))?;
        if format != "GT" && !format.starts_with("GT:") {
            return Err(self.format_err("GT must be the first FORMAT field"));
        }

        let mut alleles = vec![ref_allele.to_string()];
        if alt != "." {
            alleles.extend(alt.split(',').map(|a| a.to_string()));
        }
        let end = info
            .split(';')
            .find_map(|kv| kv.strip_prefix("END="))
            .and_then(|v| v.parse().ok());
        let marker = Marker::new(chrom_ids::chrom_index(chrom), pos, id, alleles, end)?;

        let gt_fields: Vec<&str> = fields.collect();
        let n_cols = self.keep_cols.iter().max().map_or(0, |&i| i + 1);
        if gt_fields.len() < n_cols {
            return Err(self.format_err("fewer genotype columns than samples"));
        }
        let n = self.keep_cols.len();
        let mut a1 = Vec::with_capacity(n);
        let mut a2 = Vec::with_capacity(n);
        let mut phased = Vec::with_capacity(n);
        let n_alleles = marker.n_alleles() as i64;
        for &col in &self.keep_cols {
            let field = gt_fields[col];
            let gt = field.split(':').next().unwrap_or("");
            let (left, right, is_phased) = match gt.split_once('|') {
                Some((l, r)) => (l, r, true),
                None => match gt.split_once('/') {
                    Some((l, r)) => (l, r, false),
                    None => return Err(self.format_err(format!("expected diploid genotype, found \"{}\"", gt))),
                },
            };
            let parse_allele = |s: &str| -> Result<i8, PhaseError> {
                if s == "." {
                    return Ok(-1);
                }
                match s.parse::<i64>() {
                    Ok(v) if v >= 0 && v < n_alleles => Ok(v as i8),
                    _ => Err(PhaseError::format(
                        &self.file_name,
                        Some(self.line_no),
                        format!("allele index \"{}\" out of range", s),
                    )),
                }
            };
            let v1 = parse_allele(left)?;
            let v2 = parse_allele(right)?;
            a1.push(v1);
            a2.push(v2);
            // a phased flag on a missing or homozygous genotype is
            // informationless; record it as given
            phased.push(is_phased);
        }
        Ok(Some(BasicGTRec::new(marker, a1, a2, phased)?))
    }
}

impl Iterator for VcfReader {
    type Item = Result<BasicGTRec, PhaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.parse_rec(&line) {
                Ok(Some(rec)) => return Some(Ok(rec)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Reads a phased, non-missing reference panel from VCF.
pub struct RefVcfReader {
    inner: VcfReader,
}

impl RefVcfReader {
    pub fn open(
        path: &Path,
        chrom: Option<ChromInterval>,
        excl_samples: &HashSet<String>,
        excl_markers: HashSet<String>,
    ) -> Result<RefVcfReader, PhaseError> {
        Ok(RefVcfReader {
            inner: VcfReader::open(path, chrom, excl_samples, excl_markers)?,
        })
    }

    pub fn samples(&self) -> &Samples {
        self.inner.samples()
    }
}

impl Iterator for RefVcfReader {
    type Item = Result<RefGTRec, PhaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rec = match self.inner.next()? {
            Ok(rec) => rec,
            Err(e) => return Some(Err(e)),
        };
        let n = rec.n_samples();
        let mut alleles = Vec::with_capacity(2 * n);
        for s in 0..n {
            if rec.is_missing(s) || (!rec.is_phased(s) && rec.is_het(s)) {
                return Some(Err(PhaseError::DataConsistency(format!(
                    "reference panel record at {} is unphased or has missing alleles",
                    rec.marker()
                ))));
            }
            alleles.push(rec.allele1(s));
            alleles.push(rec.allele2(s));
        }
        Some(RefGTRec::from_alleles(rec.marker().clone(), &alleles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VCF: &str = "\
##fileformat=VCFv4.2\n\
##INFO=<ID=END,Number=1,Type=Integer,Description=\"End\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\n\
20\t100\trs1\tA\tC\t.\tPASS\t.\tGT\t0/1\t1|1\n\
20\t200\trs2\tG\tT,C\t.\tPASS\t.\tGT:DP\t./.\t0|2\n\
21\t50\trs3\tA\tC\t.\tPASS\t.\tGT\t0/0\t0/0\n";

    fn write_vcf(text: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".vcf").tempfile().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_records_and_filters() {
        let f = write_vcf(VCF);
        let reader = VcfReader::open(
            f.path(),
            Some(ChromInterval::parse("20").unwrap()),
            &HashSet::new(),
            HashSet::new(),
        )
        .unwrap();
        assert_eq!(reader.samples().names(), vec!["S1", "S2"]);
        let recs: Vec<_> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].marker().pos(), 100);
        assert!(!recs[0].is_phased(0));
        assert!(recs[0].is_het(0));
        assert!(recs[1].is_missing(0));
        assert_eq!(recs[1].allele2(1), 2);
        assert_eq!(recs[1].marker().n_alleles(), 3);
    }

    #[test]
    fn sample_and_marker_exclusions() {
        let f = write_vcf(VCF);
        let excl_samples: HashSet<String> = ["S1".to_string()].into_iter().collect();
        let excl_markers: HashSet<String> = ["rs2".to_string()].into_iter().collect();
        let reader =
            VcfReader::open(f.path(), None, &excl_samples, excl_markers).unwrap();
        assert_eq!(reader.samples().names(), vec!["S2"]);
        let recs: Vec<_> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].marker().pos(), 100);
        assert_eq!(recs[1].marker().pos(), 50);
    }

    #[test]
    fn interval_filter() {
        let interval = ChromInterval::parse("20:150-250").unwrap();
        let f = write_vcf(VCF);
        let reader =
            VcfReader::open(f.path(), Some(interval), &HashSet::new(), HashSet::new()).unwrap();
        let recs: Vec<_> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].marker().pos(), 200);
    }

    #[test]
    fn ref_reader_rejects_unphased_het() {
        let f = write_vcf(VCF);
        let mut reader =
            RefVcfReader::open(f.path(), None, &HashSet::new(), HashSet::new()).unwrap();
        assert!(reader.next().unwrap().is_err());
    }
}
