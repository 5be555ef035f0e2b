use alloc::vec::Vec;
use core::fmt;

/// A buffer (re)assembler.
///
/// Tracks which byte ranges after a moving origin have been received. The origin is the first
/// byte not yet delivered in order; whenever data arrives at the origin, the contiguous prefix is
/// reported and the origin advances past it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assembler {
    contigs: Vec<Contig>,
    limit: usize,
}

/// Iterator over the data ranges held by an [`Assembler`], relative to its origin.
///
/// [`Assembler`]: struct.Assembler.html
pub struct AssemblerIter<'a> {
    contigs: core::slice::Iter<'a, Contig>,
    offset: u32,
}

/// A contiguous chunk of absent data, followed by a contiguous chunk of present data.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contig {
    hole_size: u32,
    data_size: u32,
}

/// The range could not be recorded without exceeding the hole limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TooManyHoles;

impl Contig {
    fn hole_and_data(hole_size: u32, data_size: u32) -> Contig {
        Contig { hole_size, data_size }
    }

    fn has_hole(&self) -> bool {
        self.hole_size != 0
    }

    fn has_data(&self) -> bool {
        self.data_size != 0
    }
}

impl fmt::Display for Contig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_hole() { write!(f, "({})", self.hole_size)?; }
        if self.has_hole() && self.has_data() { write!(f, " ")?; }
        if self.has_data() { write!(f, "{}",   self.data_size)?; }
        Ok(())
    }
}

impl fmt::Display for Assembler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[ ")?;
        for contig in self.contigs.iter() {
            write!(f, "{} ", contig)?;
        }
        write!(f, "]")?;
        Ok(())
    }
}

impl Assembler {
    /// Create an assembler that tracks at most `limit` separate out-of-order ranges.
    pub fn new(limit: usize) -> Self {
        Assembler { contigs: Vec::new(), limit: limit.max(1) }
    }

    /// Return whether the assembler holds no out-of-order data.
    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    /// Return whether `[start, start + size)` is already completely present.
    pub fn contains(&self, start: u32, size: u32) -> bool {
        let end = start + size;
        self.iter_data().any(|(left, right)| left <= start && end <= right)
    }

    /// The end of the last held range, relative to the origin.
    pub fn extent(&self) -> u32 {
        self.iter_data().last().map_or(0, |(_, right)| right)
    }

    /// Add a new contiguous range to the assembler.
    ///
    /// Returns the number of bytes that became assembled at the origin. The origin moves past
    /// them, so later offsets are relative to the new origin. When the range would require more
    /// separate holes than the limit allows it is rejected and nothing changes.
    pub fn add(&mut self, start: u32, size: u32) -> Result<u32, TooManyHoles> {
        if size == 0 {
            return Ok(0);
        }

        let (mut left, mut right) = (start, start + size);
        let mut ranges: Vec<(u32, u32)> = Vec::with_capacity(self.contigs.len() + 1);
        for (l, r) in self.iter_data() {
            if r < left || l > right {
                ranges.push((l, r));
            } else {
                left = left.min(l);
                right = right.max(r);
            }
        }
        let at = ranges.iter().position(|&(l, _)| l > left).unwrap_or(ranges.len());
        ranges.insert(at, (left, right));

        let assembled = match ranges.first() {
            Some(&(0, end)) => end,
            _ => 0,
        };
        let holes = if assembled > 0 { ranges.len() - 1 } else { ranges.len() };
        if holes > self.limit {
            return Err(TooManyHoles);
        }

        self.contigs.clear();
        let mut previous = assembled;
        for &(l, r) in ranges.iter().skip(if assembled > 0 { 1 } else { 0 }) {
            self.contigs.push(Contig::hole_and_data(l - previous, r - l));
            previous = r;
        }
        Ok(assembled)
    }

    /// Iterate over all of the contiguous data ranges.
    ///
    /// ```text
    ///    Hole        Data        Hole        Data
    /// |--- 100 ---|--- 100 ---|--- 200 ---|--- 100 ---|
    ///
    /// ```
    ///
    /// This would return the ranges: ``(100, 200), (400, 500)``
    pub fn iter_data(&self) -> AssemblerIter<'_> {
        AssemblerIter { contigs: self.contigs.iter(), offset: 0 }
    }
}

impl<'a> Iterator for AssemblerIter<'a> {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<(u32, u32)> {
        let contig = self.contigs.next()?;
        let left = self.offset + contig.hole_size;
        let right = left + contig.data_size;
        self.offset = right;
        Some((left, right))
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;
    use super::*;

    fn ranges(assr: &Assembler) -> Vec<(u32, u32)> {
        assr.iter_data().collect()
    }

    #[test]
    fn empty_add_full() {
        let mut assr = Assembler::new(4);
        assert_eq!(assr.add(0, 16), Ok(16));
        assert!(assr.is_empty());
    }

    #[test]
    fn empty_add_back() {
        let mut assr = Assembler::new(4);
        assert_eq!(assr.add(12, 4), Ok(0));
        assert_eq!(ranges(&assr), vec![(12, 16)]);
        assert_eq!(format!("{}", assr), "[ (12) 4 ]");
    }

    #[test]
    fn fill_front_hole() {
        let mut assr = Assembler::new(4);
        assert_eq!(assr.add(4, 8), Ok(0));
        assert_eq!(assr.add(0, 4), Ok(12));
        assert!(assr.is_empty());
    }

    #[test]
    fn origin_moves() {
        let mut assr = Assembler::new(4);
        assert_eq!(assr.add(8, 4), Ok(0));
        assert_eq!(assr.add(20, 4), Ok(0));
        assert_eq!(assr.add(0, 4), Ok(4));
        // Offsets are now relative to byte 4.
        assert_eq!(ranges(&assr), vec![(4, 8), (16, 20)]);
        assert_eq!(assr.add(0, 4), Ok(8));
        assert_eq!(ranges(&assr), vec![(8, 12)]);
    }

    #[test]
    fn overlap_merges() {
        let mut assr = Assembler::new(4);
        assert_eq!(assr.add(4, 8), Ok(0));
        assert_eq!(assr.add(2, 6), Ok(0));
        assert_eq!(ranges(&assr), vec![(2, 12)]);
        assert_eq!(assr.add(12, 4), Ok(0));
        assert_eq!(ranges(&assr), vec![(2, 16)]);
        assert!(assr.contains(4, 8));
        assert!(!assr.contains(0, 4));
        assert_eq!(assr.extent(), 16);
    }

    #[test]
    fn bridge_two_ranges() {
        let mut assr = Assembler::new(4);
        assert_eq!(assr.add(4, 4), Ok(0));
        assert_eq!(assr.add(12, 4), Ok(0));
        assert_eq!(assr.add(6, 8), Ok(0));
        assert_eq!(ranges(&assr), vec![(4, 16)]);
    }

    #[test]
    fn hole_limit() {
        let mut assr = Assembler::new(2);
        assert_eq!(assr.add(4, 1), Ok(0));
        assert_eq!(assr.add(8, 1), Ok(0));
        assert_eq!(assr.add(12, 1), Err(TooManyHoles));
        assert_eq!(ranges(&assr), vec![(4, 5), (8, 9)]);
        // Filling the front is always possible.
        assert_eq!(assr.add(0, 4), Ok(5));
    }
}
