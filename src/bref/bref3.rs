use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::gt::RefGTRec;
use crate::marker::{chrom_ids, Marker};
use crate::samples::Samples;
use crate::utils::PhaseError;

/**
 * The bref3 random-access reference format.
 *
 * Layout (all integers big-endian):
 *
 * ```text
 * magic u32 = 0x62726633 ("brf3")
 * version u8 = 1
 * program string
 * n_samples u32, then one string per sample
 * repeated record groups:
 *   n_recs u32            (0 terminates the stream)
 *   chrom string
 *   n_recs records:
 *     pos u32, id string, n_alleles u16, allele strings (u32-length),
 *     end flag u8 (+ end u32), type u8 (0 dense, 1 sparse)
 *     dense:  n_words u32, words u64...
 *     sparse: major u8, then for each non-major allele:
 *             n_carriers u32, sorted hap indices u32...
 * ```
 *
 * Records within a group share a chromosome; groups chunk a chromosome
 * so a panel can be streamed while still bounding group size. A decoded
 * window of records serves random `allele(marker, hap)` queries through
 * `RefGTRec`.
 */
pub const BREF3_MAGIC: u32 = 0x6272_6633;

const BREF3_VERSION: u8 = 1;

/// Records per group written before a group is flushed.
const MAX_GROUP_RECS: usize = 1024;

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    assert!(bytes.len() <= u16::MAX as usize);
    w.write_u16::<BigEndian>(bytes.len() as u16)?;
    w.write_all(bytes)
}

fn write_long_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_u32::<BigEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8"))
}

fn read_long_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8"))
}

pub struct Bref3Writer<W: Write> {
    w: W,
    n_haps: usize,
    group: Vec<RefGTRec>,
}

impl Bref3Writer<BufWriter<File>> {
    pub fn create(path: &Path, samples: &Samples) -> Result<Self, PhaseError> {
        let file = BufWriter::new(File::create(path)?);
        Bref3Writer::new(file, samples)
    }
}

impl<W: Write> Bref3Writer<W> {
    pub fn new(mut w: W, samples: &Samples) -> Result<Bref3Writer<W>, PhaseError> {
        w.write_u32::<BigEndian>(BREF3_MAGIC)?;
        w.write_u8(BREF3_VERSION)?;
        write_string(&mut w, concat!("brolga-", env!("CARGO_PKG_VERSION")))?;
        w.write_u32::<BigEndian>(samples.n_samples() as u32)?;
        for name in samples.names() {
            write_string(&mut w, &name)?;
        }
        Ok(Bref3Writer {
            w,
            n_haps: samples.n_haps(),
            group: Vec::with_capacity(MAX_GROUP_RECS),
        })
    }

    /// Appends a record. Records must arrive ordered by position within
    /// each chromosome.
    pub fn write_rec(&mut self, rec: RefGTRec) -> Result<(), PhaseError> {
        if rec.n_haps() != self.n_haps {
            return Err(PhaseError::DataConsistency(format!(
                "record at {} has {} haplotypes, expected {}",
                rec.marker(),
                rec.n_haps(),
                self.n_haps
            )));
        }
        let chrom_changed = self
            .group
            .last()
            .map_or(false, |last| last.marker().chrom() != rec.marker().chrom());
        if chrom_changed || self.group.len() >= MAX_GROUP_RECS {
            self.flush_group()?;
        }
        self.group.push(rec);
        Ok(())
    }

    fn flush_group(&mut self) -> Result<(), PhaseError> {
        if self.group.is_empty() {
            return Ok(());
        }
        let w = &mut self.w;
        w.write_u32::<BigEndian>(self.group.len() as u32)?;
        write_string(w, &self.group[0].marker().chrom_name())?;
        for rec in self.group.drain(..) {
            let marker = rec.marker();
            w.write_u32::<BigEndian>(marker.pos())?;
            write_string(w, marker.id())?;
            w.write_u16::<BigEndian>(marker.n_alleles() as u16)?;
            for a in marker.alleles() {
                write_long_string(w, a)?;
            }
            match marker.end() {
                Some(end) => {
                    w.write_u8(1)?;
                    w.write_u32::<BigEndian>(end)?;
                }
                None => w.write_u8(0)?,
            }
            match &rec {
                RefGTRec::Dense { bits, .. } => {
                    w.write_u8(0)?;
                    w.write_u32::<BigEndian>(bits.len() as u32)?;
                    for &word in bits.iter() {
                        w.write_u64::<BigEndian>(word)?;
                    }
                }
                RefGTRec::Sparse {
                    major, hap_lists, ..
                } => {
                    w.write_u8(1)?;
                    w.write_u8(*major)?;
                    for (a, list) in hap_lists.iter().enumerate() {
                        if a == *major as usize {
                            continue;
                        }
                        w.write_u32::<BigEndian>(list.len() as u32)?;
                        for &h in list.iter() {
                            w.write_u32::<BigEndian>(h)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Flushes pending records and writes the terminating empty group.
    pub fn finish(mut self) -> Result<W, PhaseError> {
        self.flush_group()?;
        self.w.write_u32::<BigEndian>(0)?;
        self.w.flush()?;
        Ok(self.w)
    }
}

pub struct Bref3Reader<R: Read> {
    file_name: String,
    r: R,
    samples: Samples,
    n_haps: usize,
    group_left: u32,
    chrom: u16,
    done: bool,
}

impl Bref3Reader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, PhaseError> {
        let file = BufReader::new(File::open(path)?);
        Bref3Reader::new(file, path.display().to_string())
    }
}

impl<R: Read> Bref3Reader<R> {
    pub fn new(mut r: R, file_name: String) -> Result<Bref3Reader<R>, PhaseError> {
        let fmt = |msg: &str| PhaseError::format(&file_name, None, msg);
        let magic = r.read_u32::<BigEndian>().map_err(PhaseError::Io)?;
        if magic != BREF3_MAGIC {
            return Err(fmt("not a bref3 file (bad magic)"));
        }
        let version = r.read_u8().map_err(PhaseError::Io)?;
        if version != BREF3_VERSION {
            return Err(fmt(&format!("unsupported bref3 version {}", version)));
        }
        let _program = read_string(&mut r).map_err(PhaseError::Io)?;
        let n_samples = r.read_u32::<BigEndian>().map_err(PhaseError::Io)? as usize;
        let mut names = Vec::with_capacity(n_samples);
        for _ in 0..n_samples {
            names.push(read_string(&mut r).map_err(PhaseError::Io)?);
        }
        let samples = Samples::from_names(&names)?;
        let n_haps = samples.n_haps();
        Ok(Bref3Reader {
            file_name,
            r,
            samples,
            n_haps,
            group_left: 0,
            chrom: 0,
            done: false,
        })
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    fn read_rec(&mut self) -> Result<RefGTRec, PhaseError> {
        let r = &mut self.r;
        let pos = r.read_u32::<BigEndian>()?;
        let id = read_string(r)?;
        let n_alleles = r.read_u16::<BigEndian>()? as usize;
        let mut alleles = Vec::with_capacity(n_alleles);
        for _ in 0..n_alleles {
            alleles.push(read_long_string(r)?);
        }
        let end = match r.read_u8()? {
            0 => None,
            _ => Some(r.read_u32::<BigEndian>()?),
        };
        let marker = Marker::new(self.chrom, pos, &id, alleles, end)?;
        match r.read_u8()? {
            0 => {
                let n_words = r.read_u32::<BigEndian>()? as usize;
                let mut bits = Vec::with_capacity(n_words);
                for _ in 0..n_words {
                    bits.push(r.read_u64::<BigEndian>()?);
                }
                RefGTRec::from_bits(marker, self.n_haps, bits)
            }
            1 => {
                let major = r.read_u8()?;
                let mut hap_lists = vec![Vec::new(); marker.n_alleles()];
                for a in 0..marker.n_alleles() {
                    if a == major as usize {
                        continue;
                    }
                    let n = r.read_u32::<BigEndian>()? as usize;
                    let mut list = Vec::with_capacity(n);
                    for _ in 0..n {
                        list.push(r.read_u32::<BigEndian>()?);
                    }
                    hap_lists[a] = list;
                }
                RefGTRec::from_carriers(marker, self.n_haps, major, hap_lists)
            }
            t => Err(PhaseError::format(
                &self.file_name,
                None,
                format!("unknown bref3 record type {}", t),
            )),
        }
    }
}

impl<R: Read> Iterator for Bref3Reader<R> {
    type Item = Result<RefGTRec, PhaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.group_left == 0 {
            let n = match self.r.read_u32::<BigEndian>() {
                Ok(n) => n,
                Err(e) => return Some(Err(e.into())),
            };
            if n == 0 {
                self.done = true;
                return None;
            }
            let chrom = match read_string(&mut self.r) {
                Ok(c) => c,
                Err(e) => return Some(Err(e.into())),
            };
            self.group_left = n;
            self.chrom = chrom_ids::chrom_index(&chrom);
        }
        self.group_left -= 1;
        Some(self.read_rec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(n_markers: usize, n_samples: usize) -> (Samples, Vec<RefGTRec>) {
        let names: Vec<String> = (0..n_samples).map(|i| format!("R{:04}", i)).collect();
        let samples = Samples::from_names(&names).unwrap();
        let chrom = chrom_ids::chrom_index("22");
        let recs = (0..n_markers)
            .map(|m| {
                let marker = Marker::new(
                    chrom,
                    (m as u32 + 1) * 500,
                    &format!("rs{}", m),
                    vec!["A".to_string(), "CAT".to_string()],
                    if m % 7 == 0 { Some((m as u32 + 1) * 500) } else { None },
                )
                .unwrap();
                // a mix of common and rare records
                let alleles: Vec<i32> = (0..2 * n_samples)
                    .map(|h| {
                        if m % 3 == 0 {
                            ((h + m) % 2) as i32
                        } else {
                            (h % 97 == m % 97) as i32
                        }
                    })
                    .collect();
                RefGTRec::from_alleles(marker, &alleles).unwrap()
            })
            .collect();
        (samples, recs)
    }

    #[test]
    fn encode_decode_preserves_every_allele() {
        let (samples, recs) = panel(1000, 500);
        let mut w = Bref3Writer::new(Vec::new(), &samples).unwrap();
        for rec in recs.clone() {
            w.write_rec(rec).unwrap();
        }
        let bytes = w.finish().unwrap();

        let reader = Bref3Reader::new(&bytes[..], "test.bref3".to_string()).unwrap();
        assert_eq!(reader.samples().names(), samples.names());
        let decoded: Vec<RefGTRec> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(decoded.len(), recs.len());
        for (orig, dec) in recs.iter().zip(decoded.iter()) {
            assert_eq!(orig.marker(), dec.marker());
            assert_eq!(orig.marker().id(), dec.marker().id());
            for h in 0..samples.n_haps() {
                assert_eq!(orig.allele(h), dec.allele(h));
            }
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 16];
        assert!(Bref3Reader::new(&bytes[..], "x".to_string()).is_err());
    }
}
