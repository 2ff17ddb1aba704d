//! Base-85 text encoding for inlining binary payloads in HTML documents.
//!
//! Input is processed as little-endian 32-bit words, each written as five
//! digits, least significant first. Digits use the printable range starting at
//! `*` (0x2a) with `<` and `>` replaced by `(` and `)` so encoded text can sit
//! inside a `<script>` body without escaping.
//!
//! The first five characters hold the original byte length; the decoder uses
//! it to drop the zero padding that rounds the payload up to whole words.

use super::error::{Error, Result};
use crate::bail;

const BASE: u32 = 85;
const FIRST_DIGIT: u8 = 0x2a;
const WORD_CHARS: usize = 5;

/// Number of encoded characters in one inline chunk. A multiple of
/// [`WORD_CHARS`] so no word straddles two chunks.
pub const CHUNK_CHARS: usize = WORD_CHARS * 200 * 1024;

fn digit_to_char(digit: u8) -> u8 {
    match digit + FIRST_DIGIT {
        b'<' => b'(',
        b'>' => b')',
        c => c,
    }
}

fn char_to_digit(c: u8) -> Option<u32> {
    let c = match c {
        b'(' => b'<',
        b')' => b'>',
        b'<' | b'>' => return None,
        c => c,
    };
    match c.checked_sub(FIRST_DIGIT) {
        Some(d) if u32::from(d) < BASE => Some(u32::from(d)),
        _ => None,
    }
}

fn push_word(out: &mut String, mut word: u32) {
    for _ in 0..WORD_CHARS {
        out.push(char::from(digit_to_char((word % BASE) as u8)));
        word /= BASE;
    }
}

fn read_word(chunk: &[u8]) -> Result<u32> {
    let mut word: u64 = 0;
    for &c in chunk.iter().rev() {
        let digit = char_to_digit(c).ok_or_else(|| {
            Error::GenericError(format!("invalid base85 character {:?}", char::from(c)))
        })?;
        word = word * u64::from(BASE) + u64::from(digit);
    }
    u32::try_from(word).map_err(|_| Error::GenericError("base85 word out of range".into()))
}

/// Encodes bytes into base-85 text with an embedded length prefix.
///
/// Fails for payloads of 4 GiB or more, whose length the prefix cannot hold.
pub fn encode(bytes: &[u8]) -> Result<String> {
    let prefix = length_prefix(bytes.len())?;
    let words = bytes.len().div_ceil(4);
    let mut out = String::with_capacity((words + 1) * WORD_CHARS);
    push_word(&mut out, prefix);

    for chunk in bytes.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        push_word(&mut out, u32::from_le_bytes(word));
    }
    Ok(out)
}

fn length_prefix(len: usize) -> Result<u32> {
    match u32::try_from(len) {
        Ok(prefix) => Ok(prefix),
        Err(_) => bail!("{} bytes is too large for base85 encoding", len),
    }
}

/// Decodes text produced by [`encode`] back into the original bytes.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let raw = text.as_bytes();
    if raw.len() < WORD_CHARS || raw.len() % WORD_CHARS != 0 {
        bail!(
            "base85 text length {} is not a positive multiple of {}",
            raw.len(),
            WORD_CHARS
        );
    }

    let length = read_word(&raw[..WORD_CHARS])? as usize;
    let body = &raw[WORD_CHARS..];
    let capacity = body.len() / WORD_CHARS * 4;
    if length > capacity || capacity - length >= 4 {
        bail!(
            "base85 length prefix {} does not fit {} decoded bytes",
            length,
            capacity
        );
    }

    let mut out = Vec::with_capacity(capacity);
    for chunk in body.chunks(WORD_CHARS) {
        out.extend_from_slice(&read_word(chunk)?.to_le_bytes());
    }
    out.truncate(length);
    Ok(out)
}

/// Splits encoded text into inline units of at most [`CHUNK_CHARS`] characters.
///
/// The encoder only emits ASCII, so every split point is a char boundary.
pub fn chunks(encoded: &str) -> impl Iterator<Item = &str> {
    encoded
        .as_bytes()
        .chunks(CHUNK_CHARS)
        .map(|c| std::str::from_utf8(c).unwrap_or_default())
}
