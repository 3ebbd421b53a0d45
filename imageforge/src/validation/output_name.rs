//! Output-name validation.
//!
//! The output name becomes part of an object key, so it is checked in its raw
//! form and in every percent-decoded form to catch encoded traversal such as
//! `%2e%2e%2f` or the double-encoded `%252e%252e`.

use crate::errors::OutputNameError;

/// Minimum accepted length in characters.
pub const MIN_OUTPUT_NAME_LEN: usize = 3;

/// Maximum accepted length in characters.
pub const MAX_OUTPUT_NAME_LEN: usize = 200;

const MAX_DECODE_ROUNDS: usize = 3;

const SPECIAL_CHARS: [char; 4] = ['-', '_', '.', ' '];

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Validates a user-chosen output name.
pub fn validate_output_name(name: &str) -> Result<(), OutputNameError> {
    let forms = decoded_forms(name);

    for form in &forms {
        check_unsafe_sequences(form)?;
    }

    if name.trim() != name {
        return Err(OutputNameError::Whitespace);
    }

    let len = name.chars().count();
    if !(MIN_OUTPUT_NAME_LEN..=MAX_OUTPUT_NAME_LEN).contains(&len) {
        return Err(OutputNameError::Length {
            len,
            min: MIN_OUTPUT_NAME_LEN,
            max: MAX_OUTPUT_NAME_LEN,
        });
    }

    for form in &forms {
        check_reserved(form)?;
    }

    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || SPECIAL_CHARS.contains(c)))
    {
        return Err(OutputNameError::ForbiddenCharacter(c));
    }

    let mut run = 0;
    for c in name.chars() {
        if SPECIAL_CHARS.contains(&c) {
            run += 1;
            if run >= 3 {
                return Err(OutputNameError::SpecialCharacterRun);
            }
        } else {
            run = 0;
        }
    }

    Ok(())
}

/// Decodes `%XX` escapes. Malformed escapes are kept literally and invalid
/// UTF-8 is replaced with U+FFFD.
#[must_use]
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Returns the raw name followed by each distinct decoding of it.
fn decoded_forms(name: &str) -> Vec<String> {
    let mut forms = vec![name.to_string()];
    for _ in 0..MAX_DECODE_ROUNDS {
        let Some(last) = forms.last() else { break };
        let decoded = percent_decode(last);
        if &decoded == last {
            break;
        }
        forms.push(decoded);
    }
    forms
}

fn check_unsafe_sequences(form: &str) -> Result<(), OutputNameError> {
    if form.contains('\0') {
        return Err(OutputNameError::NullByte);
    }
    if form.contains("..") || form.contains('/') || form.contains('\\') {
        return Err(OutputNameError::PathTraversal);
    }
    if form.chars().any(is_non_printable) {
        return Err(OutputNameError::NonPrintable);
    }
    Ok(())
}

fn is_non_printable(c: char) -> bool {
    c.is_control()
        || matches!(c, '\u{200B}'..='\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2060}' | '\u{FEFF}' | '\u{FFFD}')
}

fn check_reserved(form: &str) -> Result<(), OutputNameError> {
    let stem = form.split('.').next().unwrap_or_default().trim();
    let upper = stem.to_ascii_uppercase();
    if RESERVED_NAMES.contains(&upper.as_str()) {
        return Err(OutputNameError::ReservedName(stem.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_reasonable_names() {
        for name in ["demo-1", "my image", "release_2024.01", "abc", "Ubuntu Server 24"] {
            assert!(validate_output_name(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn test_rejects_traversal_raw_and_encoded() {
        let cases = [
            "..",
            "../etc",
            "a/b/c",
            "a\\b",
            "foo..bar",
            "%2e%2e%2fetc",
            "%2E%2E",
            "abc%2Fdef",
            "abc%5cdef",
            "%252e%252e%252f",
        ];
        for name in cases {
            assert_eq!(
                validate_output_name(name),
                Err(OutputNameError::PathTraversal),
                "{name} should be rejected as traversal"
            );
        }
    }

    #[test]
    fn test_rejects_null_and_control() {
        assert_eq!(validate_output_name("abc\0def"), Err(OutputNameError::NullByte));
        assert_eq!(validate_output_name("abc%00def"), Err(OutputNameError::NullByte));
        assert_eq!(validate_output_name("abc\ndef"), Err(OutputNameError::NonPrintable));
        assert_eq!(validate_output_name("abc%0Adef"), Err(OutputNameError::NonPrintable));
        assert_eq!(validate_output_name("abc\u{200B}def"), Err(OutputNameError::NonPrintable));
    }

    #[test]
    fn test_rejects_overlong_utf8_encoding() {
        // %c0%ae is an overlong encoding of '.'
        assert_eq!(validate_output_name("%c0%ae%c0%ae"), Err(OutputNameError::NonPrintable));
    }

    #[test]
    fn test_length_bounds() {
        assert!(matches!(validate_output_name("ab"), Err(OutputNameError::Length { len: 2, .. })));
        assert!(validate_output_name(&"a".repeat(200)).is_ok());
        assert!(matches!(
            validate_output_name(&"a".repeat(201)),
            Err(OutputNameError::Length { len: 201, .. })
        ));
    }

    #[test]
    fn test_reserved_names() {
        assert!(matches!(validate_output_name("con"), Err(OutputNameError::ReservedName(_))));
        assert!(matches!(validate_output_name("LPT1.iso"), Err(OutputNameError::ReservedName(_))));
        assert!(validate_output_name("console").is_ok());
    }

    #[test]
    fn test_special_character_runs() {
        assert_eq!(validate_output_name("a-_-b"), Err(OutputNameError::SpecialCharacterRun));
        assert_eq!(validate_output_name("a   b"), Err(OutputNameError::SpecialCharacterRun));
        assert!(validate_output_name("a-_b").is_ok());
    }

    #[test]
    fn test_forbidden_characters() {
        assert_eq!(validate_output_name("name;rm"), Err(OutputNameError::ForbiddenCharacter(';')));
        assert_eq!(validate_output_name("$(reboot)"), Err(OutputNameError::ForbiddenCharacter('$')));
        assert_eq!(validate_output_name("100%"), Err(OutputNameError::ForbiddenCharacter('%')));
    }

    #[test]
    fn test_whitespace_edges() {
        assert_eq!(validate_output_name(" demo"), Err(OutputNameError::Whitespace));
        assert_eq!(validate_output_name("demo "), Err(OutputNameError::Whitespace));
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%41%42"), "AB");
    }
}
