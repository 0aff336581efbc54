pub mod bref3;

pub use bref3::{Bref3Reader, Bref3Writer};
