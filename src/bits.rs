//! This module contains helpers for the packed 32-bit registers the SLD hub
//! shifts out, and for packing scan payloads into LSB-first byte buffers.

/// Extract the `width`-bit field of `word` starting at bit `offset`.
pub fn field(word: u32, offset: u32, width: u32) -> u32 {
    (word >> offset) & ((1 << width) - 1)
}

/// Fold one 4-bit nibble into a running 32-bit accumulator.
///
/// The hub shifts registers out low nibble first: the accumulator moves
/// right by 4 and the new nibble lands in the top 4 bits, so nibble 0 of
/// eight ends up least significant and nibble 7 most significant.
pub fn accumulate_nibble(word: u32, nibble: u8) -> u32 {
    (word >> 4) | (u32::from(nibble & 0xF) << 28)
}

/// Pack the low `nbits` of `word` into bytes, least-significant-bit first,
/// with any unused bits of the final byte set to 0.
pub fn word_to_bytes(word: u64, nbits: usize) -> Vec<u8> {
    let nbytes = bytes_for_bits(nbits);
    let mut bytes = Vec::with_capacity(nbytes);
    for idx in 0..nbytes {
        let byte = if 8 * idx < 64 { (word >> (8 * idx)) as u8 } else { 0 };
        bytes.push(byte);
    }
    if nbits % 8 != 0 {
        if let Some(last) = bytes.last_mut() {
            *last &= (1 << (nbits % 8)) - 1;
        }
    }
    bytes
}

/// Returns number of whole bytes required to hold `n` bits.
pub fn bytes_for_bits(n: usize) -> usize {
    (n + 7) / 8
}

#[test]
fn test_field() {
    assert_eq!(field(0xFFFF_FFFF, 27, 5), 0x1F);
    assert_eq!(field(0x0018_0005, 19, 8), 0x03);
    assert_eq!(field(0x0018_0005, 0, 8), 0x05);
    assert_eq!(field(0x0000_6E00, 8, 11), 0x06E);
}

#[test]
fn test_accumulate_nibble() {
    // Eight nibbles v0..v7 must assemble to v7<<28 | ... | v1<<4 | v0.
    let nibbles = [0x1, 0x2, 0x3, 0x4, 0x5, 0x6, 0x7, 0x8];
    let mut word = 0;
    for &n in &nibbles {
        word = accumulate_nibble(word, n);
    }
    let mut naive = 0u32;
    for (i, &n) in nibbles.iter().enumerate() {
        naive |= u32::from(n) << (4 * i);
    }
    assert_eq!(word, naive);
    assert_eq!(word, 0x8765_4321);
}

#[test]
fn test_accumulate_nibble_masks_high_bits() {
    let mut word = 0;
    for _ in 0..8 {
        word = accumulate_nibble(word, 0xFA);
    }
    assert_eq!(word, 0xAAAA_AAAA);
}

#[test]
fn test_word_to_bytes() {
    assert_eq!(word_to_bytes(0x30, 6), vec![0x30]);
    assert_eq!(word_to_bytes(0x1DA, 9), vec![0xDA, 0x01]);
    assert_eq!(word_to_bytes(0x0E, 10), vec![0x0E, 0x00]);
    assert_eq!(word_to_bytes(0xFFFF, 8), vec![0xFF]);
    assert_eq!(word_to_bytes(0, 0), vec![]);
}

#[test]
fn test_bytes_for_bits() {
    assert_eq!(bytes_for_bits(0), 0);
    assert_eq!(bytes_for_bits(1), 1);
    assert_eq!(bytes_for_bits(8), 1);
    assert_eq!(bytes_for_bits(9), 2);
    assert_eq!(bytes_for_bits(64), 8);
}
