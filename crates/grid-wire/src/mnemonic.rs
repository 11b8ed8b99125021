//! Mnemonic labels — short ASCII strings read as big-endian integers.
//!
//! `"grid"` becomes `0x67726964`: each byte is shifted in from the right.
//! Strings longer than 8 bytes keep only their last 8 bytes, and leading
//! NUL bytes vanish on the way back, so the round trip is exact only for
//! strings of at most 8 bytes that do not start with `\0`.

/// Convert a label to its big-endian numeric form. `""` maps to `0`.
pub const fn string_to_num(s: &str) -> u64 {
    let bytes = s.as_bytes();
    let mut n: u64 = 0;
    let mut i = 0;
    while i < bytes.len() {
        n = (n << 8) | bytes[i] as u64;
        i += 1;
    }
    n
}

/// Convert a number back to its label. `0` maps to `""`.
///
/// Bytes above `0x7f` come back as the Latin-1 character of the same value.
pub fn num_to_string(mut n: u64) -> String {
    let mut bytes = Vec::with_capacity(8);
    while n > 0 {
        bytes.push((n & 0xff) as u8);
        n >>= 8;
    }
    bytes.iter().rev().map(|&b| char::from(b)).collect()
}
