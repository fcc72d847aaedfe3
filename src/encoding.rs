//! Message text encoding negotiation.
//!
//! The protocol predates universal UTF-8: every message carries its text
//! as raw bytes plus an ASCII encoding identifier, and peers differ in
//! what they can read. This module picks the cheapest sufficient wire
//! encoding for outbound text and runs a fallback chain over inbound
//! bytes so that a readable string always comes out.
//!
//! Outbound selection, one classification pass:
//! - all 7-bit → `us-ascii`
//! - all within U+00FF → `iso-8859-1`
//! - anything wider → `unicode-2-0` (16-bit big-endian units)
//!
//! If the encoded payload exceeds [`MAX_MESSAGE_BYTES`], rich-text markup
//! is stripped and classification runs once more before giving up.
//!
//! Inbound chain: declared encoding ("custom" substitutes the account's
//! configured legacy encoding), then UTF-8, then a lossy salvage with an
//! explanatory note. Bytes are never dropped.

use crate::constants::MAX_MESSAGE_BYTES;
use crate::error::SessionError;

/// Identifier peers send when the text is in the sender's locally
/// configured legacy encoding rather than a named one.
pub const CUSTOM_IDENTIFIER: &str = "custom";

/// Note attached to messages that only decoded through lossy salvage.
pub const SALVAGE_NOTE: &str =
    "This message could not be decoded cleanly; the sender's client may be \
     using an unexpected character encoding.";

/// The wire encodings this client emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEncoding {
    /// 7-bit text.
    Ascii,
    /// Single-byte extended Latin text.
    Latin1,
    /// 16-bit big-endian units, surrogate pairs for supplementary planes.
    Ucs2,
}

impl WireEncoding {
    /// The ASCII identifier sent alongside message bytes.
    pub fn identifier(self) -> &'static str {
        match self {
            Self::Ascii => "us-ascii",
            Self::Latin1 => "iso-8859-1",
            Self::Ucs2 => "unicode-2-0",
        }
    }
}

/// Outbound text ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundText {
    pub encoding: WireEncoding,
    pub bytes: Vec<u8>,
    /// True when markup had to be stripped to fit the size limit.
    pub stripped: bool,
}

/// Inbound text after the decode chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    /// Present when only the lossy salvage path produced the text.
    pub note: Option<&'static str>,
}

/// Picks the minimal encoding for `text` and encodes it, stripping markup
/// once if the result exceeds the message size limit.
///
/// # Errors
///
/// Returns [`SessionError::MessageTooLong`] when even the stripped text
/// exceeds the limit.
pub fn encode_outgoing(text: &str) -> Result<OutboundText, SessionError> {
    let (encoding, bytes) = encode_minimal(text);
    if bytes.len() <= MAX_MESSAGE_BYTES {
        return Ok(OutboundText { encoding, bytes, stripped: false });
    }

    let plain = strip_markup(text);
    let (encoding, bytes) = encode_minimal(&plain);
    if bytes.len() <= MAX_MESSAGE_BYTES {
        log::info!("[encoding] Message over size limit, sent with markup stripped");
        return Ok(OutboundText { encoding, bytes, stripped: true });
    }

    Err(SessionError::MessageTooLong(bytes.len()))
}

/// Decodes inbound message bytes.
///
/// `declared` is the identifier from the message, if any; `legacy` is the
/// account-configured encoding substituted for the "custom" placeholder.
/// Always returns text: undecodable bytes go through lossy salvage with
/// [`SALVAGE_NOTE`] attached.
pub fn decode_incoming(declared: Option<&str>, bytes: &[u8], legacy: &str) -> DecodedText {
    if let Some(declared) = declared {
        let effective = if is_custom(declared) { legacy } else { declared };
        if let Some(text) = decode_with(effective, bytes) {
            return DecodedText { text, note: None };
        }
        log::debug!("[encoding] Declared charset {declared:?} failed to decode, trying UTF-8");
    }

    if let Some(text) = decode_utf8(bytes) {
        return DecodedText { text, note: None };
    }

    log::info!("[encoding] Salvaging undecodable message of {} bytes", bytes.len());
    DecodedText {
        text: String::from_utf8_lossy(bytes).into_owned(),
        note: Some(SALVAGE_NOTE),
    }
}

/// Whether a declared identifier is the "custom" placeholder.
pub fn is_custom(identifier: &str) -> bool {
    canonical(identifier).eq_ignore_ascii_case(CUSTOM_IDENTIFIER)
}

fn canonical(identifier: &str) -> &str {
    identifier.trim().trim_matches('"')
}

/// Text classification driving outbound encoding choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextClass {
    Ascii,
    Latin1,
    Wide,
}

fn classify(text: &str) -> TextClass {
    let mut class = TextClass::Ascii;
    for c in text.chars() {
        if c as u32 > 0xFF {
            return TextClass::Wide;
        }
        if !c.is_ascii() {
            class = TextClass::Latin1;
        }
    }
    class
}

fn encode_minimal(text: &str) -> (WireEncoding, Vec<u8>) {
    match classify(text) {
        TextClass::Ascii => (WireEncoding::Ascii, text.as_bytes().to_vec()),
        TextClass::Latin1 => {
            let bytes = text.chars().map(|c| c as u32 as u8).collect();
            (WireEncoding::Latin1, bytes)
        }
        TextClass::Wide => {
            let mut bytes = Vec::with_capacity(text.len() * 2);
            for unit in text.encode_utf16() {
                bytes.extend_from_slice(&unit.to_be_bytes());
            }
            (WireEncoding::Ucs2, bytes)
        }
    }
}

fn decode_with(identifier: &str, bytes: &[u8]) -> Option<String> {
    match canonical(identifier).to_ascii_lowercase().as_str() {
        "us-ascii" | "ascii" => decode_ascii(bytes),
        "iso-8859-1" | "latin-1" | "latin1" => Some(decode_latin1(bytes)),
        "unicode-2-0" | "unicode" | "utf-16be" => decode_ucs2(bytes),
        "utf-8" | "utf8" => decode_utf8(bytes),
        _ => None,
    }
}

fn decode_ascii(bytes: &[u8]) -> Option<String> {
    if bytes.iter().all(u8::is_ascii) {
        Some(String::from_utf8_lossy(bytes).into_owned())
    } else {
        None
    }
}

fn decode_latin1(bytes: &[u8]) -> String {
    // Latin-1 maps bytes to U+0000..U+00FF one to one, so this never fails.
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn decode_ucs2(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let text = char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    Some(text)
}

fn decode_utf8(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_owned)
}

/// Removes angle-bracket markup and decodes the small entity set legacy
/// clients emit. Single pass; entity-decoded characters are emitted as
/// text, never re-scanned as markup.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut iter = text.chars().peekable();

    while let Some(c) = iter.next() {
        if in_tag {
            if c == '>' {
                in_tag = false;
            }
            continue;
        }
        match c {
            '<' => in_tag = true,
            '&' => {
                let mut name = String::new();
                let mut terminated = false;
                while let Some(&next) = iter.peek() {
                    if next == ';' {
                        iter.next();
                        terminated = true;
                        break;
                    }
                    if !next.is_ascii_alphanumeric() || name.len() >= 6 {
                        break;
                    }
                    name.push(next);
                    iter.next();
                }
                match (terminated, name.as_str()) {
                    (true, "amp") => out.push('&'),
                    (true, "lt") => out.push('<'),
                    (true, "gt") => out.push('>'),
                    (true, "quot") => out.push('"'),
                    (true, "nbsp") => out.push(' '),
                    (true, other) => {
                        out.push('&');
                        out.push_str(other);
                        out.push(';');
                    }
                    (false, partial) => {
                        out.push('&');
                        out.push_str(partial);
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seven_bit_text_selects_ascii() {
        let out = encode_outgoing("hello there").unwrap();
        assert_eq!(out.encoding, WireEncoding::Ascii);
        assert_eq!(out.bytes, b"hello there");
        assert!(!out.stripped);
    }

    #[test]
    fn test_latin_text_selects_single_byte() {
        let out = encode_outgoing("café").unwrap();
        assert_eq!(out.encoding, WireEncoding::Latin1);
        assert_eq!(out.bytes, [b'c', b'a', b'f', 0xE9]);
    }

    #[test]
    fn test_wide_text_selects_ucs2() {
        let out = encode_outgoing("привет").unwrap();
        assert_eq!(out.encoding, WireEncoding::Ucs2);
        assert_eq!(out.bytes.len(), 12);
        assert_eq!(&out.bytes[..2], &[0x04, 0x3F]);
    }

    #[test]
    fn test_supplementary_plane_encodes_as_surrogates() {
        let out = encode_outgoing("🙂").unwrap();
        assert_eq!(out.encoding, WireEncoding::Ucs2);
        assert_eq!(out.bytes, [0xD8, 0x3D, 0xDE, 0x42]);
    }

    #[test]
    fn test_oversized_message_stripped_once() {
        // Padding with bold tags: stripping them gets back under the limit.
        let body = "a".repeat(MAX_MESSAGE_BYTES - 10);
        let marked = format!("<b>{body}</b><br>");
        assert!(marked.len() > MAX_MESSAGE_BYTES);

        let out = encode_outgoing(&marked).unwrap();
        assert!(out.stripped);
        assert_eq!(out.bytes.len(), body.len());
    }

    #[test]
    fn test_hopeless_oversize_rejected() {
        let text = "x".repeat(MAX_MESSAGE_BYTES * 2);
        match encode_outgoing(&text) {
            Err(SessionError::MessageTooLong(len)) => assert_eq!(len, text.len()),
            other => panic!("expected MessageTooLong, got {other:?}"),
        }
    }

    #[test]
    fn test_strip_removes_tags_and_entities() {
        let text = "<html><b>1 &lt; 2 &amp;&nbsp;3 &gt; 0</b></html>";
        assert_eq!(strip_markup(text), "1 < 2 & 3 > 0");
    }

    #[test]
    fn test_strip_keeps_unknown_entities() {
        assert_eq!(strip_markup("a &copy; b"), "a &copy; b");
    }

    #[test]
    fn test_strip_keeps_bare_ampersand() {
        assert_eq!(strip_markup("fish & chips"), "fish & chips");
    }

    #[test]
    fn test_decoded_angle_bracket_is_not_a_tag() {
        assert_eq!(strip_markup("&lt;b&gt;not bold&lt;/b&gt;"), "<b>not bold</b>");
    }

    #[test]
    fn test_inbound_declared_latin() {
        let got = decode_incoming(Some("iso-8859-1"), &[0xE9], "us-ascii");
        assert_eq!(got.text, "é");
        assert_eq!(got.note, None);
    }

    #[test]
    fn test_inbound_custom_substitutes_account_encoding() {
        let got = decode_incoming(Some("custom"), &[0xE9], "ISO-8859-1");
        assert_eq!(got.text, "é");
        assert_eq!(got.note, None);
    }

    #[test]
    fn test_inbound_no_declaration_accepts_utf8() {
        let got = decode_incoming(None, "héllo".as_bytes(), "iso-8859-1");
        assert_eq!(got.text, "héllo");
    }

    #[test]
    fn test_inbound_bad_declaration_falls_back_to_utf8() {
        let got = decode_incoming(Some("us-ascii"), "héllo".as_bytes(), "iso-8859-1");
        assert_eq!(got.text, "héllo");
        assert_eq!(got.note, None);
    }

    #[test]
    fn test_inbound_unknown_identifier_falls_back() {
        let got = decode_incoming(Some("x-klingon"), b"plain", "iso-8859-1");
        assert_eq!(got.text, "plain");
    }

    #[test]
    fn test_inbound_ucs2_decodes() {
        let got = decode_incoming(Some("unicode-2-0"), &[0x00, b'h', 0x00, b'i'], "us-ascii");
        assert_eq!(got.text, "hi");
    }

    #[test]
    fn test_salvage_always_produces_text() {
        // Invalid UTF-8 under every candidate: odd-length wide, non-ascii.
        let bytes = [0xFF, 0xFE, 0x00];
        let got = decode_incoming(Some("unicode-2-0"), &bytes, "us-ascii");
        assert!(!got.text.is_empty());
        assert_eq!(got.note, Some(SALVAGE_NOTE));
    }

    #[test]
    fn test_quoted_identifier_accepted() {
        let got = decode_incoming(Some("\"iso-8859-1\""), &[0xE9], "us-ascii");
        assert_eq!(got.text, "é");
    }
}
