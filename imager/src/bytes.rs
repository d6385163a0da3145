// Little-endian field packing into byte slices

/// Write `value` little-endian across the whole of `dst`, one byte per slot.
/// Values with bits beyond the slice are a programming error.
pub fn write_uint(dst: &mut [u8], value: u64) {
    debug_assert!(
        dst.len() >= 8 || value >> (8 * dst.len()) == 0,
        "value {:#x} does not fit in {} bytes",
        value,
        dst.len()
    );
    for (i, slot) in dst.iter_mut().enumerate() {
        *slot = if i < 8 { (value >> (8 * i)) as u8 } else { 0 };
    }
}

/// Copy `s` into `dst`, padding any remainder with ASCII spaces. Longer
/// strings are silently truncated; no terminator is written.
pub fn write_str(dst: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
    for slot in &mut dst[n..] {
        *slot = b' ';
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_is_little_endian() {
        let mut buf = [0u8; 4];
        write_uint(&mut buf, 0x1234_5678);
        assert_eq!(buf, [0x78, 0x56, 0x34, 0x12]);

        let mut word = [0u8; 2];
        write_uint(&mut word, 0xABCD);
        assert_eq!(word, [0xCD, 0xAB]);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn uint_overflow_is_caught() {
        let mut buf = [0u8; 2];
        write_uint(&mut buf, 0x1_0000);
    }

    #[test]
    fn strings_are_space_padded() {
        let mut buf = [0u8; 8];
        write_str(&mut buf, "FAT12");
        assert_eq!(&buf, b"FAT12   ");

        write_str(&mut buf, "MSWIN4.1+extra");
        assert_eq!(&buf, b"MSWIN4.1");
    }
}
