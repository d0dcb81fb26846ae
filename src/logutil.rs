//! Logging utilities for rendering raw modem traffic as single-line log text.
//! Escapes control characters that otherwise break log readability.

/// Escape a byte slice for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
/// - other non-printable bytes => `\xNN`
///
/// Truncates long slices (over `MAX_PREVIEW` bytes) with an ellipsis to cap
/// log noise. Modem traffic is not guaranteed UTF-8, so this works on raw
/// bytes rather than `&str`.
pub fn escape_bytes(data: &[u8]) -> String {
    const MAX_PREVIEW: usize = 64;
    let mut out = String::with_capacity(data.len().min(MAX_PREVIEW) + 8);
    for (count, &b) in data.iter().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", b);
            }
        }
    }
    out
}
