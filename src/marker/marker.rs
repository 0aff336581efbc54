use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::marker::chrom_ids;
use crate::utils::PhaseError;

/// Largest allele count representable by the genotype record encodings.
pub const MAX_ALLELES: usize = 127;

/**
 * An immutable description of one marker: interned chromosome index,
 * 1-based position, allele strings (the first is the reference allele),
 * an optional END coordinate, and an identifier. Identifiers do not
 * participate in equality, ordering, or hashing.
 */
#[derive(Clone, Debug)]
pub struct Marker {
    chrom: u16,
    pos: u32,
    id: Box<str>,
    alleles: Arc<[String]>,
    end: Option<u32>,
}

impl Marker {
    pub fn new(
        chrom: u16,
        pos: u32,
        id: &str,
        alleles: Vec<String>,
        end: Option<u32>,
    ) -> Result<Marker, PhaseError> {
        if alleles.is_empty() {
            return Err(PhaseError::DataConsistency(format!(
                "marker at position {} has no alleles",
                pos
            )));
        }
        if alleles.len() > MAX_ALLELES {
            return Err(PhaseError::DataConsistency(format!(
                "marker at position {} has {} alleles (limit {})",
                pos,
                alleles.len(),
                MAX_ALLELES
            )));
        }
        for (i, a) in alleles.iter().enumerate() {
            if a.is_empty() {
                return Err(PhaseError::DataConsistency(format!(
                    "marker at position {} has an empty allele",
                    pos
                )));
            }
            if alleles[..i].iter().any(|b| b == a) {
                return Err(PhaseError::DataConsistency(format!(
                    "marker at position {} has duplicate allele \"{}\"",
                    pos, a
                )));
            }
        }
        Ok(Marker {
            chrom,
            pos,
            id: id.into(),
            alleles: alleles.into(),
            end,
        })
    }

    pub fn chrom(&self) -> u16 {
        self.chrom
    }

    pub fn chrom_name(&self) -> String {
        chrom_ids::chrom_name(self.chrom)
    }

    pub fn pos(&self) -> u32 {
        self.pos
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn alleles(&self) -> &[String] {
        &self.alleles
    }

    pub fn n_alleles(&self) -> usize {
        self.alleles.len()
    }

    pub fn end(&self) -> Option<u32> {
        self.end
    }
}

impl PartialEq for Marker {
    fn eq(&self, other: &Self) -> bool {
        self.chrom == other.chrom
            && self.pos == other.pos
            && *self.alleles == *other.alleles
            && self.end == other.end
    }
}

impl Eq for Marker {}

impl Hash for Marker {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chrom.hash(state);
        self.pos.hash(state);
        self.alleles.hash(state);
        self.end.hash(state);
    }
}

impl PartialOrd for Marker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Marker {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chrom
            .cmp(&other.chrom)
            .then_with(|| self.pos.cmp(&other.pos))
            .then_with(|| self.alleles.cmp(&other.alleles))
            .then_with(|| self.end.cmp(&other.end))
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chrom_name(), self.pos)
    }
}
