//! String cleanup applied to every extracted field before ingest.

use std::sync::OnceLock;

use regex::Regex;

static INVISIBLE: OnceLock<Regex> = OnceLock::new();

fn invisible() -> &'static Regex {
    INVISIBLE.get_or_init(|| Regex::new("[\u{200b}\u{00a0}]").expect("valid cleanup regex"))
}

/// Strip zero-width spaces and non-breaking spaces, then trim.
pub fn clean_text(raw: &str) -> String {
    invisible().replace_all(raw, "").trim().to_string()
}

/// Field-aware cleanup: price fields additionally lose the currency mark.
pub fn clean_field(key: &str, raw: &str) -> String {
    let cleaned = clean_text(raw);
    if key == "price" && cleaned.contains('￥') {
        cleaned.replace('￥', "").trim().to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_invisible_characters() {
        assert_eq!(clean_text("\u{200b}青秀山\u{a0} "), "青秀山");
    }

    #[test]
    fn price_loses_currency_mark() {
        assert_eq!(clean_field("price", "￥128"), "128");
        // Other fields keep the mark.
        assert_eq!(clean_field("position", "￥128"), "￥128");
    }
}
