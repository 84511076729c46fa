//! Two-pass decoder for submitted form fields.
//!
//! Pass 1 undoes urlencoding (`%XX` and `+` -> space). Pass 2 undoes numeric
//! HTML entities (`&#NNN;` and `&#xHHHH;`), because some captive-portal
//! browsers entity-encode non-ASCII input before urlencoding it. The pass
//! order matters and must not be swapped: the percent layer is always the
//! outermost one on the wire.
//!
//! Both passes write into bounds-checked buffers capped at [`MAX_FIELD_LEN`];
//! oversized input is truncated cleanly and truncated trailing escapes are
//! dropped rather than read past the end of the input.

/// Capacity contract for a single decoded field.
pub const MAX_FIELD_LEN: usize = 256;

/// Longest entity body we accept between `&#` and `;` (e.g. `x10FFFF`).
const MAX_ENTITY_DIGITS: usize = 8;

/// Pass 1: percent-decoding with `+` as space, capped at `MAX_FIELD_LEN` bytes.
///
/// An incomplete escape at the end of input (`%` or `%A`) is dropped; a `%`
/// followed by non-hex characters is copied through literally.
pub fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len().min(MAX_FIELD_LEN));
    let mut i = 0;

    while i < bytes.len() && out.len() < MAX_FIELD_LEN {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (bytes.get(i + 1), bytes.get(i + 2)) {
                (Some(&hi), Some(&lo)) => match (hex_val(hi), hex_val(lo)) {
                    (Some(h), Some(l)) => {
                        out.push((h << 4) | l);
                        i += 3;
                    }
                    // Not a valid escape, keep the '%' literal.
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                },
                // Truncated escape at end of input.
                _ => break,
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    out
}

/// Pass 2: numeric HTML entity decoding over UTF-8 text.
///
/// `&#65;` and `&#x41;` both become `A`. Unterminated, empty, oversized or
/// out-of-range entities are copied through literally. Output is capped at
/// `MAX_FIELD_LEN` bytes, cut on a character boundary.
pub fn entity_decode(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_FIELD_LEN));
    let mut rest = input;

    while !rest.is_empty() {
        let Some(start) = rest.find("&#") else {
            push_capped(&mut out, rest);
            break;
        };
        let (literal, tail) = rest.split_at(start);
        push_capped(&mut out, literal);

        match parse_entity(&tail[2..]) {
            Some((ch, consumed)) => {
                push_capped(&mut out, ch.encode_utf8(&mut [0u8; 4]));
                rest = &tail[2 + consumed..];
            }
            None => {
                push_capped(&mut out, "&#");
                rest = &tail[2..];
            }
        }

        if out.len() >= MAX_FIELD_LEN {
            break;
        }
    }

    out
}

/// Runs both passes in order over one urlencoded field value.
pub fn decode_field(raw: &str) -> String {
    let bytes = percent_decode(raw);
    let text = String::from_utf8_lossy(&bytes);
    entity_decode(&text)
}

/// Splits an `application/x-www-form-urlencoded` body into decoded pairs.
pub fn parse_form(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_field(key), decode_field(value))
        })
        .collect()
}

/// Parses the body of one entity after `&#`: returns the decoded char and the
/// number of bytes consumed including the trailing `;`.
fn parse_entity(body: &str) -> Option<(char, usize)> {
    let bytes = body.as_bytes();
    let (radix, digits_start) = if bytes.first().is_some_and(|b| *b == b'x' || *b == b'X') {
        (16, 1)
    } else {
        (10, 0)
    };

    let mut end = digits_start;
    while end < bytes.len()
        && end - digits_start < MAX_ENTITY_DIGITS
        && (bytes[end] as char).is_digit(radix)
    {
        end += 1;
    }

    if end == digits_start || bytes.get(end) != Some(&b';') {
        return None;
    }

    let code = u32::from_str_radix(&body[digits_start..end], radix).ok()?;
    let ch = char::from_u32(code)?;
    Some((ch, end + 1))
}

fn push_capped(out: &mut String, s: &str) {
    for ch in s.chars() {
        if out.len() + ch.len_utf8() > MAX_FIELD_LEN {
            return;
        }
        out.push(ch);
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percent_encode(s: &str) -> String {
        s.bytes()
            .map(|b| match b {
                b' ' => "+".to_string(),
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' => (b as char).to_string(),
                _ => format!("%{b:02X}"),
            })
            .collect()
    }

    #[test]
    fn percent_round_trip() {
        let original = "my home network & caf\u{e9}! (2.4GHz)";
        let decoded = decode_field(&percent_encode(original));
        assert_eq!(decoded, original);
    }

    #[test]
    fn plus_becomes_space() {
        assert_eq!(decode_field("a+b"), "a b");
    }

    #[test]
    fn numeric_entities_decode() {
        assert_eq!(entity_decode("&#65;&#66;"), "AB");
        assert_eq!(entity_decode("&#x41;&#X42;"), "AB");
        assert_eq!(entity_decode("caf&#233;"), "caf\u{e9}");
    }

    #[test]
    fn broken_entities_pass_through() {
        assert_eq!(entity_decode("&#65"), "&#65");
        assert_eq!(entity_decode("&#;"), "&#;");
        assert_eq!(entity_decode("&#xZZ;"), "&#xZZ;");
        assert_eq!(entity_decode("100% &#"), "100% &#");
    }

    #[test]
    fn out_of_range_code_point_passes_through() {
        assert_eq!(entity_decode("&#x110000;"), "&#x110000;");
    }

    #[test]
    fn truncated_percent_tail_is_dropped() {
        assert_eq!(percent_decode("abc%4"), b"abc");
        assert_eq!(percent_decode("abc%"), b"abc");
    }

    #[test]
    fn stray_percent_is_literal() {
        assert_eq!(percent_decode("50%!"), b"50%!");
    }

    #[test]
    fn decoding_never_exceeds_the_cap() {
        let long = "%41".repeat(MAX_FIELD_LEN * 2);
        assert_eq!(percent_decode(&long).len(), MAX_FIELD_LEN);

        let entities = "&#65;".repeat(MAX_FIELD_LEN * 2);
        assert_eq!(entity_decode(&entities).len(), MAX_FIELD_LEN);
    }

    #[test]
    fn form_parse_decodes_both_sides() {
        // The browser entity-encoded '!' and then urlencoded the result.
        let pairs = parse_form("ssid=My+Net&pass=p%40ss%26%23x21%3B");
        assert_eq!(pairs[0], ("ssid".to_string(), "My Net".to_string()));
        assert_eq!(pairs[1].1, "p@ss!");
    }
}
