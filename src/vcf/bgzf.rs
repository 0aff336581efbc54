use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::{Compress, Compression, FlushCompress};

/// Largest uncompressed payload placed in one BGZF block.
const MAX_BLOCK_DATA: usize = 0xff00;

/// The canonical 28-byte empty BGZF block that terminates a file.
pub const EOF_BLOCK: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/**
 * A writer that frames its output as a sequence of BGZF blocks: each
 * block is an independent gzip member carrying the BC extra subfield
 * with the compressed block size, and the stream ends with the empty
 * EOF block. The result is readable by any multi-member gzip decoder.
 */
pub struct BgzfWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: Write> BgzfWriter<W> {
    pub fn new(inner: W) -> BgzfWriter<W> {
        BgzfWriter {
            inner,
            buf: Vec::with_capacity(2 * MAX_BLOCK_DATA),
        }
    }

    fn flush_full_blocks(&mut self) -> io::Result<()> {
        while self.buf.len() >= MAX_BLOCK_DATA {
            let rest = self.buf.split_off(MAX_BLOCK_DATA);
            let block = std::mem::replace(&mut self.buf, rest);
            write_block(&mut self.inner, &block)?;
        }
        Ok(())
    }

    /// Flushes buffered data and writes the EOF block. Must be called;
    /// dropping an unfinished writer loses buffered data and the
    /// terminator.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush_full_blocks()?;
        if !self.buf.is_empty() {
            let block = std::mem::take(&mut self.buf);
            write_block(&mut self.inner, &block)?;
        }
        self.inner.write_all(&EOF_BLOCK)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        self.flush_full_blocks()?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn write_block<W: Write>(inner: &mut W, data: &[u8]) -> io::Result<()> {
    debug_assert!(data.len() <= MAX_BLOCK_DATA);
    let mut compress = Compress::new(Compression::default(), false);
    let mut cdata = Vec::with_capacity(data.len() + 64);
    loop {
        let consumed = compress.total_in() as usize;
        let status = compress
            .compress_vec(&data[consumed..], &mut cdata, FlushCompress::Finish)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        match status {
            flate2::Status::StreamEnd => break,
            _ => cdata.reserve(1024),
        }
    }
    let mut crc = flate2::Crc::new();
    crc.update(data);

    let bsize = 12 + 6 + cdata.len() + 8;
    if bsize > u16::MAX as usize + 1 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "BGZF block exceeds maximum size",
        ));
    }
    // fixed gzip header with FEXTRA set
    inner.write_all(&[0x1f, 0x8b, 0x08, 0x04])?;
    inner.write_u32::<LittleEndian>(0)?; // MTIME
    inner.write_all(&[0x00, 0xff])?; // XFL, OS
    inner.write_u16::<LittleEndian>(6)?; // XLEN
    inner.write_all(&[b'B', b'C'])?;
    inner.write_u16::<LittleEndian>(2)?;
    inner.write_u16::<LittleEndian>((bsize - 1) as u16)?;
    inner.write_all(&cdata)?;
    inner.write_u32::<LittleEndian>(crc.sum())?;
    inner.write_u32::<LittleEndian>(data.len() as u32)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::io::Read;

    #[test]
    fn round_trips_through_gzip_decoder() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut w = BgzfWriter::new(Vec::new());
        w.write_all(&payload).unwrap();
        let bytes = w.finish().unwrap();
        assert!(bytes.ends_with(&EOF_BLOCK));
        let mut decoded = Vec::new();
        MultiGzDecoder::new(&bytes[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn empty_stream_is_just_the_eof_block() {
        let w = BgzfWriter::new(Vec::new());
        let bytes = w.finish().unwrap();
        assert_eq!(bytes, EOF_BLOCK);
    }
}
