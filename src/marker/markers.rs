use std::ops::Index;
use std::sync::Arc;

use crate::marker::Marker;
use crate::utils::PhaseError;

/**
 * An ordered, non-empty list of markers with the per-marker bit widths
 * needed to pack an allele vector into a compact bit array.
 *
 * `bits_per_allele(m)` is the minimum number of bits that can encode an
 * allele index at marker `m` (zero for a monomorphic marker), and
 * `sum_haplotype_bits` is the total width of one packed haplotype. The
 * pack/unpack round trip is exact for every in-range allele vector.
 */
#[derive(Clone, Debug)]
pub struct Markers {
    markers: Arc<[Marker]>,
    bit_starts: Arc<[u32]>,
}

impl Markers {
    pub fn new(markers: Vec<Marker>) -> Result<Markers, PhaseError> {
        if markers.is_empty() {
            return Err(PhaseError::DataConsistency(
                "marker list may not be empty".to_string(),
            ));
        }
        let mut bit_starts = Vec::with_capacity(markers.len() + 1);
        let mut acc = 0u32;
        for m in &markers {
            bit_starts.push(acc);
            acc += bits_for(m.n_alleles()) as u32;
        }
        bit_starts.push(acc);
        Ok(Markers {
            markers: markers.into(),
            bit_starts: bit_starts.into(),
        })
    }

    pub fn n_markers(&self) -> usize {
        self.markers.len()
    }

    pub fn marker(&self, m: usize) -> &Marker {
        &self.markers[m]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Marker> {
        self.markers.iter()
    }

    pub fn as_slice(&self) -> &[Marker] {
        &self.markers
    }

    pub fn bits_per_allele(&self, m: usize) -> usize {
        (self.bit_starts[m + 1] - self.bit_starts[m]) as usize
    }

    /// Total number of bits in one packed haplotype.
    pub fn sum_haplotype_bits(&self) -> usize {
        self.bit_starts[self.markers.len()] as usize
    }

    /// Number of 64-bit words needed to hold one packed haplotype.
    pub fn seq_words(&self) -> usize {
        (self.sum_haplotype_bits() + 63) / 64
    }

    /// Packs one allele per marker into a bit array. Every allele must be
    /// in `[0, n_alleles(m))`.
    pub fn alleles_to_bits(&self, alleles: &[i32]) -> Vec<u64> {
        assert_eq!(alleles.len(), self.n_markers());
        let mut bits = vec![0u64; self.seq_words()];
        for (m, &a) in alleles.iter().enumerate() {
            self.set_allele(&mut bits, m, a);
        }
        bits
    }

    /// Unpacks a bit array produced by `alleles_to_bits`.
    pub fn bits_to_alleles(&self, bits: &[u64]) -> Vec<i32> {
        (0..self.n_markers())
            .map(|m| self.allele_from_bits(bits, m))
            .collect()
    }

    pub fn set_allele(&self, bits: &mut [u64], m: usize, allele: i32) {
        let width = self.bits_per_allele(m);
        debug_assert!(
            allele >= 0 && (allele as usize) < self.marker(m).n_alleles(),
            "allele {} out of range at marker {}",
            allele,
            m
        );
        if width == 0 {
            return;
        }
        let start = self.bit_starts[m] as usize;
        let mask = (1u64 << width) - 1;
        let word = start / 64;
        let offset = start % 64;
        bits[word] = (bits[word] & !(mask << offset)) | ((allele as u64 & mask) << offset);
        if offset + width > 64 {
            let spill = offset + width - 64;
            let hi = (allele as u64 & mask) >> (width - spill);
            let hi_mask = (1u64 << spill) - 1;
            bits[word + 1] = (bits[word + 1] & !hi_mask) | hi;
        }
    }

    pub fn allele_from_bits(&self, bits: &[u64], m: usize) -> i32 {
        let width = self.bits_per_allele(m);
        if width == 0 {
            return 0;
        }
        let start = self.bit_starts[m] as usize;
        let mask = (1u64 << width) - 1;
        let word = start / 64;
        let offset = start % 64;
        let mut v = (bits[word] >> offset) & mask;
        if offset + width > 64 {
            let spill = offset + width - 64;
            let lo_bits = width - spill;
            v |= (bits[word + 1] & ((1u64 << spill) - 1)) << lo_bits;
        }
        v as i32
    }

    /// Returns the sublist at the given strictly increasing marker indices.
    pub fn restrict(&self, indices: &[u32]) -> Result<Markers, PhaseError> {
        Markers::new(indices.iter().map(|&i| self.markers[i as usize].clone()).collect())
    }
}

impl Index<usize> for Markers {
    type Output = Marker;

    fn index(&self, m: usize) -> &Marker {
        &self.markers[m]
    }
}

/// Bit length of `n_alleles - 1`.
fn bits_for(n_alleles: usize) -> usize {
    (usize::BITS - (n_alleles - 1).leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::chrom_ids::chrom_index;

    fn markers(allele_counts: &[usize]) -> Markers {
        let chrom = chrom_index("20");
        let alphabet: Vec<String> = (0..130).map(|i| format!("A{}", i)).collect();
        let list = allele_counts
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                Marker::new(chrom, (i + 1) as u32, ".", alphabet[..n].to_vec(), None).unwrap()
            })
            .collect();
        Markers::new(list).unwrap()
    }

    #[test]
    fn bit_widths() {
        let m = markers(&[1, 2, 3, 4, 5, 127]);
        let widths: Vec<usize> = (0..6).map(|i| m.bits_per_allele(i)).collect();
        assert_eq!(widths, vec![0, 1, 2, 2, 3, 7]);
        assert_eq!(m.sum_haplotype_bits(), 15);
    }

    #[test]
    fn pack_unpack_round_trip() {
        let counts: Vec<usize> = vec![2, 3, 1, 127, 4, 2, 2, 65, 9, 33, 2, 2, 2, 100, 5];
        let m = markers(&counts);
        // exercise every extreme allele plus a mixed pattern
        let lo: Vec<i32> = counts.iter().map(|_| 0).collect();
        let hi: Vec<i32> = counts.iter().map(|&n| (n - 1) as i32).collect();
        let mixed: Vec<i32> = counts
            .iter()
            .enumerate()
            .map(|(i, &n)| ((i * 7 + 3) % n) as i32)
            .collect();
        for alleles in [&lo, &hi, &mixed] {
            let bits = m.alleles_to_bits(alleles);
            assert_eq!(&m.bits_to_alleles(&bits), alleles);
        }
    }

    #[test]
    fn packing_crosses_word_boundaries() {
        // 20 markers x 7 bits = 140 bits spans three words
        let counts = vec![127usize; 20];
        let m = markers(&counts);
        let alleles: Vec<i32> = (0..20).map(|i| (i * 13 + 5) % 127).collect();
        let bits = m.alleles_to_bits(&alleles);
        assert_eq!(bits.len(), 3);
        assert_eq!(m.bits_to_alleles(&bits), alleles);
    }

    #[test]
    fn set_allele_overwrites() {
        let m = markers(&[4, 4, 4]);
        let mut bits = m.alleles_to_bits(&[3, 3, 3]);
        m.set_allele(&mut bits, 1, 0);
        assert_eq!(m.bits_to_alleles(&bits), vec![3, 0, 3]);
    }
}
