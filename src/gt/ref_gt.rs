use std::sync::Arc;

use crate::gt::GT;
use crate::marker::{Marker, Markers};
use crate::samples::Samples;
use crate::utils::PhaseError;

/**
 * One marker's phased, non-missing reference alleles in one of two
 * immutable representations:
 *
 * - `Dense`: a packed bit array of `n_haps * bits_per_allele` bits;
 * - `Sparse`: the most frequent ("major") allele is omitted and every
 *   other allele carries a sorted list of the haplotype indices that
 *   carry it.
 *
 * The representation with the smaller footprint is chosen when a record
 * is built from an allele vector, so low-frequency records end up as
 * carrier lists and high-frequency records as bit arrays.
 */
#[derive(Clone, Debug)]
pub enum RefGTRec {
    Dense {
        marker: Marker,
        n_haps: usize,
        bits: Arc<[u64]>,
    },
    Sparse {
        marker: Marker,
        n_haps: usize,
        major: u8,
        hap_lists: Arc<[Arc<[u32]>]>,
    },
}

impl RefGTRec {
    pub fn from_alleles(marker: Marker, alleles: &[i32]) -> Result<RefGTRec, PhaseError> {
        let n_alleles = marker.n_alleles();
        let mut counts = vec![0usize; n_alleles];
        for &a in alleles {
            if a < 0 || a as usize >= n_alleles {
                return Err(PhaseError::DataConsistency(format!(
                    "reference allele index out of range at {}",
                    marker
                )));
            }
            counts[a as usize] += 1;
        }
        let major = counts
            .iter()
            .enumerate()
            .max_by_key(|&(_, c)| c)
            .map(|(a, _)| a)
            .unwrap();
        let minor_carriers: usize = alleles.len() - counts[major];
        let width = bits_per_allele(&marker);
        let dense_bits = alleles.len() * width;
        let sparse_bits = minor_carriers * 32;
        if sparse_bits < dense_bits {
            let hap_lists: Vec<Arc<[u32]>> = (0..n_alleles)
                .map(|a| {
                    if a == major {
                        Arc::from(Vec::new())
                    } else {
                        let carriers: Vec<u32> = alleles
                            .iter()
                            .enumerate()
                            .filter(|&(_, &al)| al as usize == a)
                            .map(|(h, _)| h as u32)
                            .collect();
                        Arc::from(carriers)
                    }
                })
                .collect();
            Ok(RefGTRec::Sparse {
                marker,
                n_haps: alleles.len(),
                major: major as u8,
                hap_lists: hap_lists.into(),
            })
        } else {
            let mut bits = vec![0u64; (alleles.len() * width + 63) / 64];
            for (h, &a) in alleles.iter().enumerate() {
                set_bits(&mut bits, h * width, width, a as u64);
            }
            Ok(RefGTRec::Dense {
                marker,
                n_haps: alleles.len(),
                bits: bits.into(),
            })
        }
    }

    /// Builds a dense record from a packed bit array (bref3 decoding).
    pub fn from_bits(marker: Marker, n_haps: usize, bits: Vec<u64>) -> Result<RefGTRec, PhaseError> {
        let width = bits_per_allele(&marker);
        if bits.len() != (n_haps * width + 63) / 64 {
            return Err(PhaseError::DataConsistency(format!(
                "packed allele array has wrong length at {}",
                marker
            )));
        }
        Ok(RefGTRec::Dense {
            marker,
            n_haps,
            bits: bits.into(),
        })
    }

    /// Builds a sparse record from per-allele carrier lists (bref3
    /// decoding). Lists must be sorted, in range, and empty for `major`.
    pub fn from_carriers(
        marker: Marker,
        n_haps: usize,
        major: u8,
        hap_lists: Vec<Vec<u32>>,
    ) -> Result<RefGTRec, PhaseError> {
        if hap_lists.len() != marker.n_alleles() || (major as usize) >= marker.n_alleles() {
            return Err(PhaseError::DataConsistency(format!(
                "carrier lists inconsistent with allele count at {}",
                marker
            )));
        }
        if !hap_lists[major as usize].is_empty() {
            return Err(PhaseError::DataConsistency(format!(
                "major allele carries a haplotype list at {}",
                marker
            )));
        }
        for list in &hap_lists {
            if !list.windows(2).all(|w| w[0] < w[1]) {
                return Err(PhaseError::DataConsistency(format!(
                    "carrier list not strictly increasing at {}",
                    marker
                )));
            }
            if list.last().map_or(false, |&h| h as usize >= n_haps) {
                return Err(PhaseError::DataConsistency(format!(
                    "carrier index out of range at {}",
                    marker
                )));
            }
        }
        Ok(RefGTRec::Sparse {
            marker,
            n_haps,
            major,
            hap_lists: hap_lists.into_iter().map(Arc::from).collect::<Vec<_>>().into(),
        })
    }

    pub fn marker(&self) -> &Marker {
        match self {
            RefGTRec::Dense { marker, .. } => marker,
            RefGTRec::Sparse { marker, .. } => marker,
        }
    }

    pub fn n_haps(&self) -> usize {
        match self {
            RefGTRec::Dense { n_haps, .. } => *n_haps,
            RefGTRec::Sparse { n_haps, .. } => *n_haps,
        }
    }

    pub fn allele(&self, hap: usize) -> i32 {
        match self {
            RefGTRec::Dense { marker, bits, .. } => {
                let width = bits_per_allele(marker);
                if width == 0 {
                    0
                } else {
                    get_bits(bits, hap * width, width) as i32
                }
            }
            RefGTRec::Sparse {
                major, hap_lists, ..
            } => {
                for (a, list) in hap_lists.iter().enumerate() {
                    if a != *major as usize && list.binary_search(&(hap as u32)).is_ok() {
                        return a as i32;
                    }
                }
                *major as i32
            }
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, RefGTRec::Sparse { .. })
    }

    /// The omitted allele of a sparse record.
    pub fn major_allele(&self) -> Option<i32> {
        match self {
            RefGTRec::Sparse { major, .. } => Some(*major as i32),
            RefGTRec::Dense { .. } => None,
        }
    }

    /// Sorted carrier haplotypes of `allele` in a sparse record. `None`
    /// for dense records and for the major allele.
    pub fn carriers(&self, allele: usize) -> Option<&[u32]> {
        match self {
            RefGTRec::Sparse {
                major, hap_lists, ..
            } if allele != *major as usize => Some(&hap_lists[allele]),
            _ => None,
        }
    }

    pub fn to_alleles(&self) -> Vec<i32> {
        (0..self.n_haps()).map(|h| self.allele(h)).collect()
    }
}

fn bits_per_allele(marker: &Marker) -> usize {
    (usize::BITS - (marker.n_alleles() - 1).leading_zeros()) as usize
}

fn set_bits(bits: &mut [u64], start: usize, width: usize, value: u64) {
    let word = start / 64;
    let offset = start % 64;
    bits[word] |= value << offset;
    if offset + width > 64 {
        bits[word + 1] |= value >> (64 - offset);
    }
}

fn get_bits(bits: &[u64], start: usize, width: usize) -> u64 {
    let mask = (1u64 << width) - 1;
    let word = start / 64;
    let offset = start % 64;
    let mut v = bits[word] >> offset;
    if offset + width > 64 {
        v |= bits[word + 1] << (64 - offset);
    }
    v & mask
}

/// A phased reference panel for one window: a `RefGTRec` per marker.
#[derive(Clone)]
pub struct RefGT {
    markers: Markers,
    samples: Samples,
    recs: Arc<[RefGTRec]>,
}

impl RefGT {
    pub fn new(samples: Samples, recs: Vec<RefGTRec>) -> Result<RefGT, PhaseError> {
        let markers = Markers::new(recs.iter().map(|r| r.marker().clone()).collect())?;
        for rec in &recs {
            if rec.n_haps() != samples.n_haps() {
                return Err(PhaseError::Invariant(format!(
                    "reference record at {} has {} haplotypes, expected {}",
                    rec.marker(),
                    rec.n_haps(),
                    samples.n_haps()
                )));
            }
        }
        Ok(RefGT {
            markers,
            samples,
            recs: recs.into(),
        })
    }

    pub fn rec(&self, marker: usize) -> &RefGTRec {
        &self.recs[marker]
    }

    /// A panel over the sublist of markers at the given strictly
    /// increasing indices. Records are shared, not copied.
    pub fn restrict(&self, indices: &[u32]) -> Result<RefGT, PhaseError> {
        let recs: Vec<RefGTRec> = indices.iter().map(|&i| self.recs[i as usize].clone()).collect();
        RefGT::new(self.samples.clone(), recs)
    }
}

impl GT for RefGT {
    fn markers(&self) -> &Markers {
        &self.markers
    }

    fn samples(&self) -> &Samples {
        &self.samples
    }

    fn allele1(&self, marker: usize, sample: usize) -> i32 {
        self.recs[marker].allele(2 * sample)
    }

    fn allele2(&self, marker: usize, sample: usize) -> i32 {
        self.recs[marker].allele(2 * sample + 1)
    }

    fn allele(&self, marker: usize, hap: usize) -> i32 {
        self.recs[marker].allele(hap)
    }

    fn is_phased(&self) -> bool {
        true
    }

    fn is_phased_at(&self, _marker: usize, _sample: usize) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::chrom_ids::chrom_index;

    fn marker(n_alleles: usize) -> Marker {
        let alleles: Vec<String> = ["A", "C", "G", "T"][..n_alleles]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Marker::new(chrom_index("1"), 100, ".", alleles, None).unwrap()
    }

    #[test]
    fn rare_allele_becomes_sparse() {
        let mut alleles = vec![0i32; 1000];
        alleles[17] = 1;
        alleles[803] = 1;
        let rec = RefGTRec::from_alleles(marker(2), &alleles).unwrap();
        assert!(rec.is_sparse());
        assert_eq!(rec.major_allele(), Some(0));
        assert_eq!(rec.carriers(1), Some(&[17u32, 803][..]));
        assert_eq!(rec.to_alleles(), alleles);
    }

    #[test]
    fn common_allele_stays_dense() {
        let alleles: Vec<i32> = (0..1000).map(|h| (h % 2) as i32).collect();
        let rec = RefGTRec::from_alleles(marker(2), &alleles).unwrap();
        assert!(!rec.is_sparse());
        assert_eq!(rec.to_alleles(), alleles);
    }

    #[test]
    fn multi_allelic_round_trip() {
        let alleles: Vec<i32> = (0..100).map(|h| (h % 4) as i32).collect();
        let rec = RefGTRec::from_alleles(marker(4), &alleles).unwrap();
        assert_eq!(rec.to_alleles(), alleles);
        for h in 0..100 {
            assert_eq!(rec.allele(h), (h % 4) as i32);
        }
    }
}
