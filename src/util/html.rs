use std::borrow::Cow;

use super::text::strip_control_chars;

/// Renders post markup as plain text.
///
/// `<br>` becomes a newline, every other tag is dropped, the common named
/// entities and numeric character references are decoded, and terminal
/// control characters are stripped. Malformed markup never fails: an
/// unterminated tag swallows the rest of the input, an unknown entity is
/// kept verbatim.
///
/// # Examples
///
/// ```
/// use chanwatch::util::html_to_plain_text;
///
/// assert_eq!(
///     html_to_plain_text("<span class=\"quote\">&gt;be me</span><br>cook"),
///     ">be me\ncook"
/// );
/// ```
pub fn html_to_plain_text(input: &str) -> Cow<'_, str> {
    if !input.contains(['<', '&']) {
        return strip_control_chars(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find(['<', '&']) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if rest.starts_with('<') {
            match rest.find('>') {
                Some(end) => {
                    let tag = &rest[1..end];
                    if is_line_break(tag) {
                        out.push('\n');
                    }
                    rest = &rest[end + 1..];
                }
                None => {
                    rest = "";
                }
            }
        } else {
            match decode_entity(rest) {
                Some((decoded, consumed)) => {
                    out.push(decoded);
                    rest = &rest[consumed..];
                }
                None => {
                    out.push('&');
                    rest = &rest[1..];
                }
            }
        }
    }
    out.push_str(rest);

    if let Cow::Owned(stripped) = strip_control_chars(&out) {
        return Cow::Owned(stripped);
    }
    Cow::Owned(out)
}

fn is_line_break(tag: &str) -> bool {
    let name = tag
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("");
    name.eq_ignore_ascii_case("br")
}

/// Decodes the entity at the start of `s`, returning the char and the bytes consumed.
fn decode_entity(s: &str) -> Option<(char, usize)> {
    // Longest entity we handle is "&#x10FFFF;"
    let end = s.char_indices().take(12).find(|&(_, c)| c == ';')?.0;
    let body = &s[1..end];

    let decoded = match body {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        _ => {
            let number = body.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)?
        }
    };

    Some((decoded, end + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passthrough() {
        assert!(matches!(
            html_to_plain_text("just words"),
            Cow::Borrowed("just words")
        ));
    }

    #[test]
    fn test_tags_removed_and_breaks_kept() {
        assert_eq!(
            html_to_plain_text("<b>bold</b><br/>next<BR>last"),
            "bold\nnext\nlast"
        );
    }

    #[test]
    fn test_entities_decoded() {
        assert_eq!(
            html_to_plain_text("&gt;&gt;123 &amp; &quot;q&quot; &#039;s&#x27;"),
            ">>123 & \"q\" 's'"
        );
    }

    #[test]
    fn test_unknown_entity_kept() {
        assert_eq!(html_to_plain_text("fish &chips; & more"), "fish &chips; & more");
    }

    #[test]
    fn test_unterminated_tag_swallows_rest() {
        assert_eq!(html_to_plain_text("text <a href="), "text ");
    }

    #[test]
    fn test_control_chars_stripped_after_decoding() {
        assert_eq!(html_to_plain_text("a&#27;[31mb<br>c"), "ab\nc");
    }
}
