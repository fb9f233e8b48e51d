//! Text framing for serial data sent to WebSocket clients.
//!
//! Every chunk read from the device becomes one text frame.  Bytes are decoded
//! as UTF-8 with invalid sequences replaced by U+FFFD, so a frame is always
//! valid text even when the device emits binary noise.

/// Converts one chunk of serial bytes into the text of a client frame.
///
/// When `strip_newline` is set, a single trailing `\n` is removed together
/// with a `\r` directly before it.  Newlines in the middle of the chunk are
/// left alone.
///
/// # Example
///
/// ```rust
/// use serialws_core::frame_text;
///
/// assert_eq!(frame_text(b"HELLO\n", true), "HELLO");
/// assert_eq!(frame_text(b"HELLO\r\n", true), "HELLO");
/// assert_eq!(frame_text(b"HELLO\n", false), "HELLO\n");
/// ```
pub fn frame_text(bytes: &[u8], strip_newline: bool) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if strip_newline && text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
