use std::borrow::Cow;
use std::cell::Cell;
use std::collections::HashMap;

use lol_html::html_content::ContentType;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use tracing::{debug, warn};

/// Marker class the forum puts on protected email links.
pub const CLOAKED_EMAIL_SELECTOR: &str = ".__cf_email__";
pub const CLOAKED_EMAIL_ATTR: &str = "data-cfemail";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Known dimensions keyed by the `src` attribute value, entities decoded.
pub type ImageSizes = HashMap<String, ImageSize>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedInput {
    #[error("cloaked email is empty")]
    Empty,
    #[error("cloaked email has odd length {0}")]
    OddLength(usize),
    #[error("unexpected hex digit {digit:?} at index {index}")]
    InvalidDigit { index: usize, digit: char },
}

/// Reverses the single-byte XOR cloaking: the first byte is the key, every
/// following byte XOR the key is one character of the address.
pub fn decode_cloaked_email(encoded: &str) -> Result<String, MalformedInput> {
    if encoded.is_empty() {
        return Err(MalformedInput::Empty);
    }
    if encoded.len() % 2 != 0 {
        return Err(MalformedInput::OddLength(encoded.len()));
    }
    let bytes = hex::decode(encoded).map_err(|err| match err {
        hex::FromHexError::InvalidHexCharacter { c, index } => {
            MalformedInput::InvalidDigit { index, digit: c }
        }
        _ => MalformedInput::OddLength(encoded.len()),
    })?;
    let (key, rest) = match bytes.split_first() {
        Some(split) => split,
        None => return Err(MalformedInput::Empty),
    };
    Ok(rest.iter().map(|byte| char::from(byte ^ key)).collect())
}

/// Patches `<img>` sizes and de-cloaks protected emails.
///
/// Returns the input untouched (borrowed) when nothing needed rewriting, and
/// also when the rewriter rejects the markup.
pub fn process<'a>(html: &'a str, known_image_sizes: &ImageSizes) -> Cow<'a, str> {
    let changed = Cell::new(false);

    let mut handlers = Vec::with_capacity(2);
    if !known_image_sizes.is_empty() {
        handlers.push(element!("img[src]", |el| {
            let Some(raw) = el.get_attribute("src") else {
                return Ok(());
            };
            // Attribute text comes back undecoded (`&amp;` and friends).
            let src = html_escape::decode_html_entities(&raw);
            if let Some(size) = known_image_sizes.get(&*src) {
                el.set_attribute("width", &size.width.to_string())?;
                el.set_attribute("height", &size.height.to_string())?;
                debug!(%src, width = size.width, height = size.height, "resized image");
                changed.set(true);
            }
            Ok(())
        }));
    }
    handlers.push(element!(CLOAKED_EMAIL_SELECTOR, |el| {
        let encoded = el.get_attribute(CLOAKED_EMAIL_ATTR).unwrap_or_default();
        match decode_cloaked_email(&encoded) {
            Ok(email) if !email.is_empty() => {
                el.replace(&email, ContentType::Text);
                changed.set(true);
            }
            Ok(_) => {}
            Err(err) => debug!(%encoded, error = %err, "leaving cloaked email in place"),
        }
        Ok(())
    }));

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            strict: false,
            ..RewriteStrSettings::default()
        },
    );

    match rewritten {
        Ok(output) if changed.get() => Cow::Owned(output),
        Ok(_) => Cow::Borrowed(html),
        Err(err) => {
            warn!(error = %err, "html rewrite failed, keeping original markup");
            Cow::Borrowed(html)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn cloak(email: &str, key: u8) -> String {
        let mut bytes = vec![key];
        bytes.extend(email.bytes().map(|b| b ^ key));
        hex::encode(bytes)
    }

    fn sizes(entries: &[(&str, u32, u32)]) -> ImageSizes {
        entries
            .iter()
            .map(|(src, w, h)| (src.to_string(), ImageSize::new(*w, *h)))
            .collect()
    }

    #[test]
    fn decodes_known_sample() {
        // key 0x42
        let encoded = cloak("me@v2ex.com", 0x42);
        assert!(encoded.starts_with("42"));
        assert_eq!(decode_cloaked_email(&encoded).unwrap(), "me@v2ex.com");
        assert_eq!(
            decode_cloaked_email(&encoded.to_uppercase()).unwrap(),
            "me@v2ex.com"
        );
    }

    #[test]
    fn decode_round_trips_printable_ascii() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let len = rng.gen_range(1..40);
            let email: String = (0..len)
                .map(|_| char::from(rng.gen_range(0x20_u8..0x7f)))
                .collect();
            let key: u8 = rng.gen();
            assert_eq!(decode_cloaked_email(&cloak(&email, key)).unwrap(), email);
        }
    }

    #[test]
    fn decode_rejects_malformed_hex() {
        assert_eq!(
            decode_cloaked_email("abc"),
            Err(MalformedInput::OddLength(3))
        );
        assert_eq!(
            decode_cloaked_email("zz11"),
            Err(MalformedInput::InvalidDigit {
                index: 0,
                digit: 'z'
            })
        );
        assert_eq!(decode_cloaked_email(""), Err(MalformedInput::Empty));
    }

    #[test]
    fn key_only_decodes_to_empty() {
        assert_eq!(decode_cloaked_email("7f").unwrap(), "");
    }

    #[test]
    fn untouched_html_is_returned_verbatim() {
        let html = "<div>\n  <p class='x'>hello   <b>world</b></p>\n<img src=\"b.png\"></div>";
        let out = process(html, &ImageSizes::new());
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, html);

        let out = process(html, &sizes(&[("a.png", 1, 1)]));
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn sets_known_image_sizes() {
        let out = process("<img src='a.png'>", &sizes(&[("a.png", 100, 50)]));
        assert!(out.contains(r#"width="100" height="50""#), "got {out}");
    }

    #[test]
    fn matches_image_src_after_decoding_entities() {
        let known = sizes(&[("https://i.v2ex.co/a.png?x=1&y=2", 100, 50)]);
        let out = process(r#"<img src="https://i.v2ex.co/a.png?x=1&amp;y=2">"#, &known);
        assert!(out.contains(r#"width="100" height="50""#), "got {out}");
        assert!(out.contains("x=1&amp;y=2"), "got {out}");
    }

    #[test]
    fn overwrites_existing_sizes_on_every_matching_image() {
        let html = r#"<p><img src="a.png" width="1" height="2"><img src="a.png"><img src="c.png"></p>"#;
        let out = process(html, &sizes(&[("a.png", 640, 480)]));
        assert_eq!(out.matches(r#"width="640""#).count(), 2, "got {out}");
        assert_eq!(out.matches(r#"height="480""#).count(), 2, "got {out}");
        assert!(!out.contains(r#"width="1""#));
        assert!(out.contains(r#"<img src="c.png">"#));
    }

    #[test]
    fn replaces_cloaked_email_with_text() {
        let encoded = cloak("a<b>@v2ex.com", 0x1d);
        let html = format!(
            r#"<p>mail <a href="/cdn-cgi/l/email-protection" class="__cf_email__" data-cfemail="{encoded}">[email&#160;protected]</a> now</p>"#
        );
        let out = process(&html, &ImageSizes::new());
        assert_eq!(out, "<p>mail a&lt;b&gt;@v2ex.com now</p>");
    }

    #[test]
    fn malformed_email_is_isolated() {
        let good = cloak("ok@v2ex.com", 0x33);
        let html = format!(
            r#"<a class="__cf_email__" data-cfemail="abc">x</a> <a class="__cf_email__" data-cfemail="{good}">y</a>"#
        );
        let out = process(&html, &ImageSizes::new());
        assert_eq!(
            out,
            r#"<a class="__cf_email__" data-cfemail="abc">x</a> ok@v2ex.com"#
        );
    }

    #[test]
    fn only_malformed_emails_leave_input_borrowed() {
        let html = r#"<a class="__cf_email__" data-cfemail="zz11">x</a>"#;
        assert!(matches!(process(html, &ImageSizes::new()), Cow::Borrowed(_)));
    }
}
