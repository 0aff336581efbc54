pub mod bgzf;
pub mod reader;
pub mod writer;

pub use bgzf::BgzfWriter;
pub use reader::{ChromInterval, RefVcfReader, VcfReader};
pub use writer::VcfWriter;
