use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Legacy bibliographic codes folded onto their canonical 3-letter code.
/// MARC kept "B" codes long after ISO moved on; the dump contains both.
static LEGACY_CODES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("alb", "sqi"),
        ("arm", "hye"),
        ("baq", "eus"),
        ("bur", "mya"),
        ("chi", "zho"),
        ("cze", "ces"),
        ("dut", "nld"),
        ("fre", "fra"),
        ("geo", "kat"),
        ("ger", "deu"),
        ("gre", "ell"),
        ("ice", "isl"),
        ("mac", "mkd"),
        ("may", "msa"),
        ("per", "fas"),
        ("rum", "ron"),
        ("slo", "slk"),
        ("tib", "bod"),
        ("wel", "cym"),
        // Pre-split Serbo-Croatian codes
        ("scc", "srp"),
        ("scr", "hrv"),
    ])
});

/// Codes deliberately mapped to "no language" so the output does not grow
/// near-duplicate language rows (catch-alls and retired variants).
static DEPRECATED_CODES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["und", "mul", "mis", "zxx", "esk", "lan", "sao"]));

/// Maps a raw dump language code to its canonical 3-letter form.
/// Returns `None` for deprecated codes and anything that is not a 3-letter
/// code after folding; callers treat that as a missing language.
pub fn map_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_lowercase();
    if DEPRECATED_CODES.contains(code.as_str()) {
        return None;
    }
    let folded = LEGACY_CODES.get(code.as_str()).copied().unwrap_or(&code);
    if folded.len() == 3 && folded.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(folded.to_string())
    } else {
        None
    }
}

/// Best-effort language detection from a title, used when an edition declares
/// no language at all. Purely script-based and deterministic; precision is
/// not a goal, avoiding a rejected record is.
pub fn detect_from_title(title: &str) -> Option<String> {
    let mut latin = 0usize;
    let mut cyrillic = 0usize;
    let mut ukrainian = 0usize;
    let mut greek = 0usize;
    let mut han = 0usize;
    let mut kana = 0usize;
    let mut hangul = 0usize;
    let mut arabic = 0usize;
    let mut hebrew = 0usize;
    let mut devanagari = 0usize;

    for c in title.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '\u{00C0}'..='\u{024F}' => latin += 1,
            '\u{0404}' | '\u{0406}' | '\u{0407}' | '\u{0454}' | '\u{0456}' | '\u{0457}'
            | '\u{0490}' | '\u{0491}' => {
                // Letters only Ukrainian uses within the Cyrillic block
                cyrillic += 1;
                ukrainian += 1;
            }
            '\u{0400}'..='\u{04FF}' => cyrillic += 1,
            '\u{0370}'..='\u{03FF}' => greek += 1,
            '\u{4E00}'..='\u{9FFF}' => han += 1,
            '\u{3040}'..='\u{30FF}' => kana += 1,
            '\u{AC00}'..='\u{D7AF}' => hangul += 1,
            '\u{0600}'..='\u{06FF}' => arabic += 1,
            '\u{0590}'..='\u{05FF}' => hebrew += 1,
            '\u{0900}'..='\u{097F}' => devanagari += 1,
            _ => {}
        }
    }

    let total = latin + cyrillic + greek + han + kana + hangul + arabic + hebrew + devanagari;
    if total == 0 {
        return None;
    }
    let code = if kana > 0 {
        "jpn"
    } else if hangul * 2 > total {
        "kor"
    } else if han * 2 > total {
        "zho"
    } else if cyrillic * 2 > total {
        if ukrainian > 0 {
            "ukr"
        } else {
            "rus"
        }
    } else if greek * 2 > total {
        "ell"
    } else if arabic * 2 > total {
        "ara"
    } else if hebrew * 2 > total {
        "heb"
    } else if devanagari * 2 > total {
        "hin"
    } else {
        "eng"
    };
    map_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_codes_fold_to_canonical() {
        assert_eq!(map_code("fre").as_deref(), Some("fra"));
        assert_eq!(map_code("GER").as_deref(), Some("deu"));
        assert_eq!(map_code("eng").as_deref(), Some("eng"));
    }

    #[test]
    fn deprecated_codes_are_suppressed() {
        assert_eq!(map_code("und"), None);
        assert_eq!(map_code("mul"), None);
        assert_eq!(map_code("zxx"), None);
    }

    #[test]
    fn malformed_codes_are_rejected(){
        assert_eq!(map_code(""), None);
        assert_eq!(map_code("en"), None);
        assert_eq!(map_code("engl"), None);
        assert_eq!(map_code("e1g"), None);
    }

    #[test]
    fn near_duplicate_codes_collapse_to_one_row_key() {
        // scc/srp and scr/hrv must not both survive as separate languages
        assert_eq!(map_code("scc"), map_code("srp"));
        assert_eq!(map_code("scr"), map_code("hrv"));
    }

    #[test]
    fn detection_is_script_based() {
        assert_eq!(detect_from_title("War and Peace").as_deref(), Some("eng"));
        assert_eq!(detect_from_title("Война и мир").as_deref(), Some("rus"));
        assert_eq!(detect_from_title("Лісова пісня").as_deref(), Some("ukr"));
        assert_eq!(detect_from_title("吾輩は猫である").as_deref(), Some("jpn"));
        assert_eq!(detect_from_title("1984").is_none(), true);
    }
}
