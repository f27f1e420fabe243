//! Per-byte XOR cipher protecting stored signature text.
//!
//! Byte `i` is XORed with `(i % 51) + 52`. Applying the cipher twice yields the input, so the same
//! routine both encodes and decodes.

pub const KEY_PERIOD: usize = 51;
pub const KEY_BASE: u8 = 52;

const KEY: [u8; KEY_PERIOD] = {
    let mut key = [0; KEY_PERIOD];
    let mut i = 0;
    while i < KEY_PERIOD {
        key[i] = i as u8 + KEY_BASE;
        i += 1;
    }
    key
};

#[inline(always)]
pub fn key_byte(index: usize) -> u8 {
    (index % KEY_PERIOD) as u8 + KEY_BASE
}

/// Reference definition, one byte at a time.
pub fn apply_scalar(buffer: &mut [u8]) {
    for (i, b) in buffer.iter_mut().enumerate() {
        *b ^= key_byte(i);
    }
}

/// Same result as [`apply_scalar`], one key period per step so the inner loop vectorizes.
pub fn apply(buffer: &mut [u8]) {
    for chunk in buffer.chunks_mut(KEY_PERIOD) {
        for (b, k) in chunk.iter_mut().zip(KEY.iter()) {
            *b ^= k;
        }
    }
}

pub fn decode(blob: &[u8]) -> Vec<u8> {
    let mut buffer = blob.to_vec();
    apply(&mut buffer);
    buffer
}

/// Decode a blob holding NUL terminated pattern text. Text after the first NUL is dropped.
pub fn decode_to_string(blob: &[u8]) -> String {
    let buffer = decode(blob);
    let end = memchr::memchr(0, &buffer).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..end]).into_owned()
}

/// Produce a blob for `text` including its NUL terminator.
pub fn encode(text: &str) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(text.len() + 1);
    buffer.extend_from_slice(text.as_bytes());
    buffer.push(0);
    apply(&mut buffer);
    buffer
}
