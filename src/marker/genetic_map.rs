use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::marker::chrom_ids;
use crate::utils::PhaseError;

/// Genetic positions in cM. Either linearly interpolated from a PLINK
/// format map or the 1 cM/Mb fallback used when no map is supplied.
#[derive(Clone, Debug)]
pub enum GeneticMap {
    ConstantRate { cm_per_mb: f64 },
    Plink(PlinkGenMap),
}

#[derive(Clone, Debug)]
pub struct PlinkGenMap {
    chroms: HashMap<u16, MapChrom>,
}

#[derive(Clone, Debug)]
struct MapChrom {
    base_pos: Vec<u32>,
    gen_pos: Vec<f64>,
}

const DEFAULT_CM_PER_MB: f64 = 1.0;

impl GeneticMap {
    /// The 1 cM per Mb map used when `map=` is absent.
    pub fn constant() -> GeneticMap {
        GeneticMap::ConstantRate {
            cm_per_mb: DEFAULT_CM_PER_MB,
        }
    }

    /// Reads a PLINK map: whitespace-separated `chrom id cM bp` columns,
    /// strictly increasing cM and bp within each chromosome.
    pub fn from_plink(path: &Path) -> Result<GeneticMap, PhaseError> {
        let file_name = path.display().to_string();
        let reader = BufReader::new(File::open(path)?);
        let mut chroms: HashMap<u16, MapChrom> = HashMap::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = Some(line_no as u64 + 1);
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(PhaseError::format(
                    &file_name,
                    line_no,
                    "expected 4 whitespace-separated columns: chrom id cM bp",
                ));
            }
            let chrom = chrom_ids::chrom_index(fields[0]);
            let cm: f64 = fields[2].parse().map_err(|_| {
                PhaseError::format(&file_name, line_no, format!("invalid cM value \"{}\"", fields[2]))
            })?;
            let bp: u32 = fields[3].parse().map_err(|_| {
                PhaseError::format(&file_name, line_no, format!("invalid bp value \"{}\"", fields[3]))
            })?;
            let entry = chroms.entry(chrom).or_insert_with(|| MapChrom {
                base_pos: Vec::new(),
                gen_pos: Vec::new(),
            });
            if let (Some(&last_bp), Some(&last_cm)) =
                (entry.base_pos.last(), entry.gen_pos.last())
            {
                if bp <= last_bp || cm <= last_cm {
                    return Err(PhaseError::format(
                        &file_name,
                        line_no,
                        "map positions must be strictly increasing within a chromosome",
                    ));
                }
            }
            entry.base_pos.push(bp);
            entry.gen_pos.push(cm);
        }
        if chroms.is_empty() {
            return Err(PhaseError::format(&file_name, None, "empty genetic map"));
        }
        Ok(GeneticMap::Plink(PlinkGenMap { chroms }))
    }

    /// Genetic position of a base position in cM.
    pub fn gen_pos(&self, chrom: u16, pos: u32) -> f64 {
        match self {
            GeneticMap::ConstantRate { cm_per_mb } => pos as f64 * 1e-6 * cm_per_mb,
            GeneticMap::Plink(map) => map.gen_pos(chrom, pos),
        }
    }

    pub fn gen_dist(&self, chrom: u16, pos_a: u32, pos_b: u32) -> f64 {
        (self.gen_pos(chrom, pos_b) - self.gen_pos(chrom, pos_a)).abs()
    }
}

impl PlinkGenMap {
    fn gen_pos(&self, chrom: u16, pos: u32) -> f64 {
        let mc = match self.chroms.get(&chrom) {
            Some(mc) => mc,
            // chromosome absent from the map
            None => return pos as f64 * 1e-6 * DEFAULT_CM_PER_MB,
        };
        if mc.base_pos.len() == 1 {
            let dx = pos as f64 - mc.base_pos[0] as f64;
            return mc.gen_pos[0] + dx * 1e-6 * DEFAULT_CM_PER_MB;
        }
        // interval for interpolation; terminal intervals extrapolate
        let i = match mc.base_pos.binary_search(&pos) {
            Ok(i) => return mc.gen_pos[i],
            Err(0) => 0,
            Err(i) if i >= mc.base_pos.len() => mc.base_pos.len() - 2,
            Err(i) => i - 1,
        };
        let (x0, x1) = (mc.base_pos[i] as f64, mc.base_pos[i + 1] as f64);
        let (y0, y1) = (mc.gen_pos[i], mc.gen_pos[i + 1]);
        y0 + (pos as f64 - x0) * (y1 - y0) / (x1 - x0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    #[test]
    fn constant_rate() {
        let map = GeneticMap::constant();
        assert_relative_eq!(map.gen_pos(0, 2_000_000), 2.0);
        assert_relative_eq!(map.gen_dist(0, 1_000_000, 4_000_000), 3.0);
    }

    #[test]
    fn plink_interpolation_and_extrapolation() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "9 . 0.0 1000000").unwrap();
        writeln!(f, "9 . 2.0 2000000").unwrap();
        writeln!(f, "9 . 3.0 4000000").unwrap();
        let map = GeneticMap::from_plink(f.path()).unwrap();
        let chrom = chrom_ids::chrom_index("9");
        assert_relative_eq!(map.gen_pos(chrom, 1_000_000), 0.0);
        assert_relative_eq!(map.gen_pos(chrom, 1_500_000), 1.0);
        assert_relative_eq!(map.gen_pos(chrom, 3_000_000), 2.5);
        // beyond the last map point: terminal interval slope
        assert_relative_eq!(map.gen_pos(chrom, 6_000_000), 4.0);
        // before the first map point
        assert_relative_eq!(map.gen_pos(chrom, 500_000), -1.0);
    }

    #[test]
    fn rejects_non_monotone_map() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "1 . 0.0 1000").unwrap();
        writeln!(f, "1 . 0.5 900").unwrap();
        assert!(GeneticMap::from_plink(f.path()).is_err());
    }
}
