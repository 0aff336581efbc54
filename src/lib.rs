//! Brolga phases diploid genotypes along a chromosome with a Li-Stephens
//! haploid HMM whose states are composite reference haplotypes assembled
//! from PBWT-selected IBS neighbours, run window-by-window with overlap
//! splicing. Reference panels may be supplied as VCF or in the bref3
//! random-access binary format.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod bref;
pub mod cli;
pub mod gt;
pub mod marker;
pub mod phase;
pub mod samples;
pub mod utils;
pub mod vcf;
pub mod window;
