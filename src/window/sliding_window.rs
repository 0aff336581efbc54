use std::sync::Arc;

use crate::gt::{BasicGTRec, RefGTRec};
use crate::marker::GeneticMap;
use crate::samples::Samples;
use crate::utils::PhaseError;

/// An ordered reference-panel record source with one-record lookahead.
pub struct RefPanel {
    samples: Samples,
    src: Box<dyn Iterator<Item = Result<RefGTRec, PhaseError>> + Send>,
    lookahead: Option<RefGTRec>,
    last: Option<(u16, u32)>,
    name: String,
}

impl RefPanel {
    pub fn new(
        samples: Samples,
        name: String,
        src: Box<dyn Iterator<Item = Result<RefGTRec, PhaseError>> + Send>,
    ) -> RefPanel {
        RefPanel {
            samples,
            src,
            lookahead: None,
            last: None,
            name,
        }
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    fn next_rec(&mut self) -> Result<Option<RefGTRec>, PhaseError> {
        let rec = match self.lookahead.take() {
            Some(rec) => rec,
            None => match self.src.next() {
                Some(rec) => rec?,
                None => return Ok(None),
            },
        };
        let key = (rec.marker().chrom(), rec.marker().pos());
        if let Some((chrom, pos)) = self.last {
            if key.0 == chrom && key.1 < pos {
                return Err(PhaseError::format(
                    &self.name,
                    None,
                    format!("non-monotone position {} on {}", key.1, rec.marker().chrom_name()),
                ));
            }
        }
        self.last = Some(key);
        Ok(Some(rec))
    }
}

/**
 * One phasing window: the target records, the aligned reference records
 * when a panel is present, leading/trailing overlap counts in both
 * coordinate systems, and whether this is the final window on its
 * chromosome.
 */
pub struct Window {
    pub index: usize,
    pub targ_recs: Vec<BasicGTRec>,
    pub ref_recs: Option<Vec<RefGTRec>>,
    pub prev_overlap: usize,
    pub next_overlap: usize,
    pub ref_prev_overlap: usize,
    pub ref_next_overlap: usize,
    pub last_on_chrom: bool,
}

impl Window {
    pub fn chrom(&self) -> u16 {
        self.targ_recs[0].marker().chrom()
    }

    pub fn n_targ_markers(&self) -> usize {
        self.targ_recs.len()
    }

    /// For each reference marker, whether it matches a target marker at
    /// (position, alleles). Every target marker must find a match.
    pub fn ref_mask(&self) -> Result<Option<Vec<bool>>, PhaseError> {
        let ref_recs = match &self.ref_recs {
            Some(recs) => recs,
            None => return Ok(None),
        };
        let mut mask = vec![false; ref_recs.len()];
        let mut m = 0usize;
        for rec in &self.targ_recs {
            let marker = rec.marker();
            while m < ref_recs.len() && ref_recs[m].marker().pos() < marker.pos() {
                m += 1;
            }
            // scan the run of reference records at this position for an
            // allele-for-allele match
            let mut found = false;
            let mut k = m;
            while k < ref_recs.len() && ref_recs[k].marker().pos() == marker.pos() {
                let rm = ref_recs[k].marker();
                if !mask[k] && rm.alleles() == marker.alleles() {
                    mask[k] = true;
                    found = true;
                    break;
                }
                k += 1;
            }
            if !found {
                return Err(PhaseError::DataConsistency(format!(
                    "target marker {} with alleles {:?} is absent from the reference panel",
                    marker,
                    marker.alleles()
                )));
            }
        }
        Ok(Some(mask))
    }
}

/**
 * Streams marker records into overlapping windows. Records accumulate
 * until the genetic distance from the window's first marker exceeds the
 * window length; the trailing records within the overlap length of the
 * last marker seed the next window. A chromosome change or the end of
 * the record stream closes the current window with no trailing overlap.
 */
pub struct WindowSrc {
    targ: Box<dyn Iterator<Item = Result<BasicGTRec, PhaseError>> + Send>,
    targ_lookahead: Option<BasicGTRec>,
    targ_last: Option<(u16, u32)>,
    refp: Option<RefPanel>,
    map: Arc<GeneticMap>,
    window_cm: f64,
    overlap_cm: f64,
    pending: Vec<BasicGTRec>,
    pending_ref: Vec<RefGTRec>,
    index: usize,
    done: bool,
    name: String,
}

impl WindowSrc {
    pub fn new(
        name: String,
        targ: Box<dyn Iterator<Item = Result<BasicGTRec, PhaseError>> + Send>,
        refp: Option<RefPanel>,
        map: Arc<GeneticMap>,
        window_cm: f64,
        overlap_cm: f64,
    ) -> WindowSrc {
        assert!(window_cm > overlap_cm);
        WindowSrc {
            targ,
            targ_lookahead: None,
            targ_last: None,
            refp,
            map,
            window_cm,
            overlap_cm,
            pending: Vec::new(),
            pending_ref: Vec::new(),
            index: 0,
            done: false,
            name,
        }
    }

    pub fn ref_samples(&self) -> Option<&Samples> {
        self.refp.as_ref().map(|r| r.samples())
    }

    fn next_targ_rec(&mut self) -> Result<Option<BasicGTRec>, PhaseError> {
        let rec = match self.targ_lookahead.take() {
            Some(rec) => rec,
            None => match self.targ.next() {
                Some(rec) => rec?,
                None => return Ok(None),
            },
        };
        let key = (rec.marker().chrom(), rec.marker().pos());
        if let Some((chrom, pos)) = self.targ_last {
            if key.0 == chrom && key.1 < pos {
                return Err(PhaseError::format(
                    &self.name,
                    None,
                    format!("non-monotone position {} on {}", key.1, rec.marker().chrom_name()),
                ));
            }
        }
        self.targ_last = Some(key);
        Ok(Some(rec))
    }

    /// Returns the next window, or `None` when the record stream is
    /// exhausted.
    pub fn next_window(&mut self) -> Result<Option<Window>, PhaseError> {
        if self.done {
            return Ok(None);
        }
        let mut recs = std::mem::take(&mut self.pending);
        let prev_overlap = recs.len();
        loop {
            let rec = match self.next_targ_rec()? {
                Some(rec) => rec,
                None => {
                    self.done = true;
                    if recs.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(self.emit(recs, prev_overlap, 0, true)?));
                }
            };
            if let Some(first) = recs.first() {
                if rec.marker().chrom() != first.marker().chrom() {
                    self.targ_lookahead = Some(rec);
                    return Ok(Some(self.emit(recs, prev_overlap, 0, true)?));
                }
            }
            recs.push(rec);
            let first = recs[0].marker();
            let last = recs[recs.len() - 1].marker();
            let span = self.map.gen_dist(first.chrom(), first.pos(), last.pos());
            if span > self.window_cm {
                // look ahead to decide whether this window is the last
                // one on its chromosome
                match self.next_targ_rec()? {
                    None => {
                        self.done = true;
                        return Ok(Some(self.emit(recs, prev_overlap, 0, true)?));
                    }
                    Some(nxt) => {
                        let chrom_change = nxt.marker().chrom() != first.chrom();
                        self.targ_lookahead = Some(nxt);
                        if chrom_change {
                            return Ok(Some(self.emit(recs, prev_overlap, 0, true)?));
                        }
                        let next_overlap = self.trailing_overlap(&recs, prev_overlap);
                        return Ok(Some(self.emit(recs, prev_overlap, next_overlap, false)?));
                    }
                }
            }
        }
    }

    fn trailing_overlap(&self, recs: &[BasicGTRec], prev_overlap: usize) -> usize {
        let chrom = recs[0].marker().chrom();
        let last_cm = self.map.gen_pos(chrom, recs[recs.len() - 1].marker().pos());
        let cutoff = last_cm - self.overlap_cm;
        let mut n = 0;
        while n < recs.len() - prev_overlap
            && self.map.gen_pos(chrom, recs[recs.len() - 1 - n].marker().pos()) >= cutoff
        {
            n += 1;
        }
        n
    }

    fn emit(
        &mut self,
        recs: Vec<BasicGTRec>,
        prev_overlap: usize,
        next_overlap: usize,
        last_on_chrom: bool,
    ) -> Result<Window, PhaseError> {
        if next_overlap > 0 {
            self.pending = recs[recs.len() - next_overlap..].to_vec();
        }
        let overlap_start_pos = (next_overlap > 0)
            .then(|| recs[recs.len() - next_overlap].marker().pos());
        let (ref_recs, ref_prev_overlap, ref_next_overlap) = match self.refp.is_some() {
            true => {
                let chrom = recs[0].marker().chrom();
                let last_pos = recs[recs.len() - 1].marker().pos();
                let (list, prev, next) =
                    self.collect_ref_recs(chrom, last_pos, overlap_start_pos)?;
                (Some(list), prev, next)
            }
            false => (None, prev_overlap, next_overlap),
        };
        let window = Window {
            index: self.index,
            targ_recs: recs,
            ref_recs,
            prev_overlap,
            next_overlap,
            ref_prev_overlap,
            ref_next_overlap,
            last_on_chrom,
        };
        self.index += 1;
        debug!(
            "window {}: {} target markers, overlap {}/{}, last_on_chrom={}",
            window.index,
            window.n_targ_markers(),
            window.prev_overlap,
            window.next_overlap,
            window.last_on_chrom
        );
        Ok(window)
    }

    fn collect_ref_recs(
        &mut self,
        chrom: u16,
        last_pos: u32,
        overlap_start_pos: Option<u32>,
    ) -> Result<(Vec<RefGTRec>, usize, usize), PhaseError> {
        let refp = self.refp.as_mut().unwrap();
        let mut list = std::mem::take(&mut self.pending_ref);
        let ref_prev_overlap = list.len();
        let mut on_chrom = !list.is_empty();
        loop {
            let rec = match refp.next_rec()? {
                Some(rec) => rec,
                None => break,
            };
            if rec.marker().chrom() != chrom {
                if on_chrom {
                    // reference has moved past this chromosome
                    refp.lookahead = Some(rec);
                    break;
                }
                continue; // reference chromosomes preceding the window
            }
            on_chrom = true;
            if rec.marker().pos() > last_pos {
                refp.lookahead = Some(rec);
                break;
            }
            list.push(rec);
        }
        let ref_next_overlap = match overlap_start_pos {
            Some(start) => {
                let n = list
                    .iter()
                    .rev()
                    .take_while(|r| r.marker().pos() >= start)
                    .count()
                    .min(list.len() - ref_prev_overlap);
                self.pending_ref = list[list.len() - n..].to_vec();
                n
            }
            None => 0,
        };
        Ok((list, ref_prev_overlap, ref_next_overlap))
    }
}
