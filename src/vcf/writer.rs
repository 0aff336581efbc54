use std::io::{self, Write};

use crate::marker::Marker;
use crate::samples::Samples;
use crate::vcf::BgzfWriter;

/// Writes phased VCF 4.2 records, BGZF-framed, with `|`-separated
/// genotypes. The stream must be closed with `finish` so the EOF block
/// is emitted.
pub struct VcfWriter<W: Write> {
    out: BgzfWriter<W>,
    n_samples: usize,
    buf: String,
}

impl<W: Write> VcfWriter<W> {
    pub fn new(inner: W, samples: &Samples) -> io::Result<VcfWriter<W>> {
        let mut out = BgzfWriter::new(inner);
        let mut header = String::new();
        header.push_str("##fileformat=VCFv4.2\n");
        header.push_str(concat!(
            "##source=brolga-",
            env!("CARGO_PKG_VERSION"),
            "\n"
        ));
        header.push_str("##INFO=<ID=END,Number=1,Type=Integer,Description=\"End position of the variant described in this record\">\n");
        header.push_str("##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n");
        header.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT");
        for name in samples.names() {
            header.push('\t');
            header.push_str(&name);
        }
        header.push('\n');
        out.write_all(header.as_bytes())?;
        Ok(VcfWriter {
            out,
            n_samples: samples.n_samples(),
            buf: String::new(),
        })
    }

    /// Writes one phased record. `alleles[s]` is sample `s`'s ordered
    /// allele pair.
    pub fn write_rec(&mut self, marker: &Marker, alleles: &[(i32, i32)]) -> io::Result<()> {
        assert_eq!(alleles.len(), self.n_samples);
        let buf = &mut self.buf;
        buf.clear();
        buf.push_str(&marker.chrom_name());
        buf.push('\t');
        buf.push_str(&marker.pos().to_string());
        buf.push('\t');
        buf.push_str(marker.id());
        buf.push('\t');
        buf.push_str(&marker.alleles()[0]);
        buf.push('\t');
        if marker.n_alleles() == 1 {
            buf.push('.');
        } else {
            for (i, a) in marker.alleles()[1..].iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                buf.push_str(a);
            }
        }
        buf.push_str("\t.\tPASS\t");
        match marker.end() {
            Some(end) => {
                buf.push_str("END=");
                buf.push_str(&end.to_string());
            }
            None => buf.push('.'),
        }
        buf.push_str("\tGT");
        for &(a1, a2) in alleles {
            debug_assert!(a1 >= 0 && a2 >= 0, "unphased output at {}", marker);
            buf.push('\t');
            buf.push_str(&a1.to_string());
            buf.push('|');
            buf.push_str(&a2.to_string());
        }
        buf.push('\n');
        self.out.write_all(self.buf.as_bytes())
    }

    pub fn finish(self) -> io::Result<W> {
        self.out.finish()
    }
}
