//! Text helpers for captured process output.

/// Shortens `text` to at most `max_bytes` bytes without splitting a UTF-8 sequence.
///
/// Returns `true` when anything was removed.
pub fn truncate_utf8(text: &mut String, max_bytes: usize) -> bool {
    if text.len() <= max_bytes {
        return false;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    true
}

/// Decodes raw output bytes, replacing invalid sequences, and caps the result at `max_bytes`.
pub fn decode_output(bytes: &[u8], max_bytes: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    truncate_utf8(&mut text, max_bytes);
    text
}
