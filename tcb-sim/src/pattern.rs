//! The iperf digit pattern of the transferred stream.

const DIGIT: &[u8; 10] = b"0123456789";

/// Fill a buffer with the pattern, starting at `offset` in the stream.
pub fn init(buf: &mut [u8], offset: usize) {
    buf.iter_mut()
        .zip(DIGIT.iter().cycle().skip(offset % 10))
        .for_each(|(out, digit)| *out = *digit);
}

/// Count the bytes that deviate from the pattern, for data starting at `offset` in the stream.
pub fn mismatches(buf: &[u8], offset: usize) -> usize {
    buf.iter()
        .zip(DIGIT.iter().cycle().skip(offset % 10))
        .filter(|(got, digit)| got != digit)
        .count()
}
