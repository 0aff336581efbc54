use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::utils::PhaseError;

struct SampleIds {
    names: Vec<String>,
    indices: HashMap<String, u32>,
}

lazy_static! {
    static ref SAMPLE_IDS: RwLock<SampleIds> = RwLock::new(SampleIds {
        names: Vec::new(),
        indices: HashMap::new(),
    });
}

fn intern(name: &str) -> u32 {
    if let Some(&idx) = SAMPLE_IDS.read().unwrap().indices.get(name) {
        return idx;
    }
    let mut ids = SAMPLE_IDS.write().unwrap();
    if let Some(&idx) = ids.indices.get(name) {
        return idx;
    }
    let idx = ids.names.len() as u32;
    ids.names.push(name.to_string());
    ids.indices.insert(name.to_string(), idx);
    idx
}

/// An ordered list of samples. Sample `s` owns haplotypes `2s` and
/// `2s + 1`. Identifiers are interned process-wide so lists from
/// different sources can be compared by index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Samples {
    ids: Arc<[u32]>,
}

impl Samples {
    /// Interns the given names. Duplicate names are a data consistency
    /// error.
    pub fn from_names(names: &[String]) -> Result<Samples, PhaseError> {
        let ids: Vec<u32> = names.iter().map(|n| intern(n)).collect();
        let mut seen = std::collections::HashSet::new();
        for (id, name) in ids.iter().zip(names) {
            if !seen.insert(*id) {
                return Err(PhaseError::DataConsistency(format!(
                    "duplicate sample identifier \"{}\"",
                    name
                )));
            }
        }
        Ok(Samples { ids: ids.into() })
    }

    pub fn n_samples(&self) -> usize {
        self.ids.len()
    }

    pub fn n_haps(&self) -> usize {
        2 * self.ids.len()
    }

    pub fn name(&self, sample: usize) -> String {
        SAMPLE_IDS.read().unwrap().names[self.ids[sample] as usize].clone()
    }

    pub fn names(&self) -> Vec<String> {
        let ids = SAMPLE_IDS.read().unwrap();
        self.ids.iter().map(|&i| ids.names[i as usize].clone()).collect()
    }

    pub fn interned_id(&self, sample: usize) -> u32 {
        self.ids[sample]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        let id = SAMPLE_IDS.read().unwrap().indices.get(name).copied()?;
        self.ids.iter().position(|&i| i == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        let names = vec!["NA00001".to_string(), "NA00002".to_string()];
        let samples = Samples::from_names(&names).unwrap();
        assert_eq!(samples.n_samples(), 2);
        assert_eq!(samples.n_haps(), 4);
        assert_eq!(samples.names(), names);
        assert_eq!(samples.index_of("NA00002"), Some(1));
        assert_eq!(samples.index_of("NA99999"), None);
    }

    #[test]
    fn duplicate_samples_rejected() {
        let names = vec!["S1".to_string(), "S1".to_string()];
        assert!(Samples::from_names(&names).is_err());
    }
}
