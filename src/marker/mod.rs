pub mod chrom_ids;
pub mod genetic_map;
pub mod marker;
pub mod markers;

pub use genetic_map::GeneticMap;
pub use marker::Marker;
pub use markers::Markers;
