use std::collections::HashMap;
use std::sync::RwLock;

/// Process-wide chromosome identifier interner. Chromosome names are
/// compared by interned index everywhere outside of I/O.
struct ChromIds {
    names: Vec<String>,
    indices: HashMap<String, u16>,
}

lazy_static! {
    static ref CHROM_IDS: RwLock<ChromIds> = RwLock::new(ChromIds {
        names: Vec::new(),
        indices: HashMap::new(),
    });
}

/// Returns the index of `name`, interning it on first use.
pub fn chrom_index(name: &str) -> u16 {
    if let Some(&idx) = CHROM_IDS.read().unwrap().indices.get(name) {
        return idx;
    }
    let mut ids = CHROM_IDS.write().unwrap();
    if let Some(&idx) = ids.indices.get(name) {
        return idx;
    }
    let idx = ids.names.len();
    assert!(idx <= u16::MAX as usize, "too many distinct chromosomes");
    ids.names.push(name.to_string());
    ids.indices.insert(name.to_string(), idx as u16);
    idx as u16
}

/// Returns the index of `name` if it has been interned.
pub fn lookup(name: &str) -> Option<u16> {
    CHROM_IDS.read().unwrap().indices.get(name).copied()
}

/// Returns the name interned at `index`. Panics on an index that was
/// never returned by `chrom_index`.
pub fn chrom_name(index: u16) -> String {
    CHROM_IDS.read().unwrap().names[index as usize].clone()
}
