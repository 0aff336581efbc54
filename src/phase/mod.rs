pub mod coded_steps;
pub mod est_phase;
pub mod fixed_phase_data;
pub mod hmm;
pub mod ibs2;
pub mod impute_baum;
pub mod low_freq_phase_ibs;
pub mod pbwt;
pub mod phase_baum;
pub mod phase_data;
pub mod phase_driver;
pub mod phase_haps;
pub mod phase_states;
pub mod recomb;

pub use phase_driver::PhaseDriver;
