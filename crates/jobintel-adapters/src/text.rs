use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat};
use regex::Regex;

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

fn entity_pattern() -> &'static Regex {
    static ENTITIES: OnceLock<Regex> = OnceLock::new();
    ENTITIES.get_or_init(|| {
        Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("valid regex")
    })
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(dec) = entity.strip_prefix('#') {
        return dec.parse::<u32>().ok().and_then(char::from_u32);
    }
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => None,
    }
}

/// Replace tags with spaces, decode common entities, trim.
pub(crate) fn strip_html(html: &str) -> String {
    let without_tags = tag_pattern().replace_all(html, " ");
    let decoded = entity_pattern().replace_all(&without_tags, |caps: &regex::Captures<'_>| {
        match decode_entity(&caps[1]) {
            Some(ch) => ch.to_string(),
            None => caps[0].to_string(),
        }
    });
    decoded.replace('\u{a0}', " ").trim().to_string()
}

/// Unix seconds as an RFC 3339 UTC timestamp.
pub(crate) fn epoch_to_rfc3339(seconds: i64) -> Option<String> {
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, false))
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_flattened_to_text() {
        assert_eq!(
            strip_html("<p>Build <b>Python</b> &amp; SQL&nbsp;pipelines</p>"),
            "Build  Python  & SQL pipelines"
        );
        assert_eq!(strip_html("caf&#233; &#x41; &bogus;"), "café A &bogus;");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn epoch_seconds_become_utc_timestamps() {
        assert_eq!(
            epoch_to_rfc3339(1_700_000_000).as_deref(),
            Some("2023-11-14T22:13:20+00:00")
        );
    }
}
