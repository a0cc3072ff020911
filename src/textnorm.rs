use once_cell::sync::Lazy;
use regex::Regex;

/// Literal entity fragments left behind by the dump's broken escaping.
/// These are substring replacements on purpose: the input contains partially
/// escaped entities that a real HTML decoder would pass through untouched.
const BROKEN_FRAGMENTS: &[(&str, &str)] = &[
    ("&#13;", ""),
    ("&#13", ""),
    ("&#10;", ""),
    ("&#10", ""),
    ("&quot;", "\""),
    ("&quot", "\""),
    ("&#39;", "'"),
    ("&#39", "'"),
];

/// Two or more separator characters, optionally interleaved with whitespace.
/// Brackets are deliberately not part of the class so balanced pairs survive.
static PUNCT_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:[,.;:!?/\\|*+=~"'_-]\s*){2,}"#).unwrap());

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Optional case normalization applied as the last step of [`normalize_with_case`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStyle {
    Unchanged,
    /// Capitalize the first letter only.
    Sentence,
    /// Capitalize the first letter of every word.
    Title,
}

/// Cleans a raw title/publisher/subject string from the dump.
///
/// Steps, in order: broken-fragment stripping, HTML entity unescaping (run to
/// a fixpoint, the dump contains doubly-escaped text), trailing-backslash
/// strip, removal of unmatched brackets, collapse of punctuation/whitespace
/// runs, and an outer trim that leaves balanced brackets alone.
///
/// The function is idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(raw: &str) -> String {
    let decoded = decode_entities(raw);
    let decoded = decoded.trim_end_matches('\\');
    let balanced = strip_unmatched_brackets(decoded);
    let collapsed = PUNCT_RUN.replace_all(&balanced, " ");
    let collapsed = WHITESPACE_RUN.replace_all(&collapsed, " ");
    collapsed.trim_matches(is_outer_trim_char).to_string()
}

pub fn normalize_with_case(raw: &str, case: CaseStyle) -> String {
    let cleaned = normalize(raw);
    match case {
        CaseStyle::Unchanged => cleaned,
        CaseStyle::Sentence => capitalize_first(&cleaned),
        CaseStyle::Title => title_case(&cleaned),
    }
}

/// Capitalizes the first character of a string.
pub fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Capitalizes every whitespace-separated word, lowercasing the rest.
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(c) => {
                    c.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(raw: &str) -> String {
    let mut current = raw.to_string();
    // Fixpoint loop: each round strips broken fragments, then decodes one
    // layer of escaping. Bounded because real data is at most a few layers
    // deep and every round can only shrink or stabilize the string.
    for _ in 0..8 {
        let mut stripped = current.clone();
        for (fragment, replacement) in BROKEN_FRAGMENTS {
            if stripped.contains(fragment) {
                stripped = stripped.replace(fragment, replacement);
            }
        }
        let decoded = html_escape::decode_html_entities(&stripped).into_owned();
        if decoded == current {
            return decoded;
        }
        current = decoded;
    }
    current
}

/// Removes unmatched `()[]{}` characters with a single stack-based scan.
/// Correctly paired brackets are preserved, including their interior.
fn strip_unmatched_brackets(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut keep = vec![true; chars.len()];
    let mut stack: Vec<(usize, char)> = Vec::new();
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '(' | '[' | '{' => stack.push((i, c)),
            ')' | ']' | '}' => {
                let opener = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.last().map(|&(_, open)| open) == Some(opener) {
                    stack.pop();
                } else {
                    // Closing bracket with no matching opener
                    keep[i] = false;
                }
            }
            _ => {}
        }
    }
    // Whatever is left on the stack was never closed
    for (i, _) in stack {
        keep[i] = false;
    }
    chars
        .iter()
        .zip(keep)
        .filter_map(|(&c, kept)| kept.then_some(c))
        .collect()
}

fn is_outer_trim_char(c: char) -> bool {
    c.is_whitespace()
        || (c.is_ascii_punctuation() && !matches!(c, '(' | ')' | '[' | ']' | '{' | '}'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brackets_balanced(s: &str) -> bool {
        let mut stack = Vec::new();
        for c in s.chars() {
            match c {
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => {
                    let opener = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(opener) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        stack.is_empty()
    }

    #[test]
    fn strips_broken_entity_fragments() {
        assert_eq!(normalize("Cats&#13 and dogs"), "Cats and dogs");
        assert_eq!(normalize("line one&#10line two"), "line oneline two");
    }

    #[test]
    fn decodes_real_entities_including_double_escapes() {
        assert_eq!(normalize("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(normalize("Tom &amp;amp; Jerry"), "Tom & Jerry");
        assert_eq!(normalize("1 &lt; 2"), "1 < 2");
    }

    #[test]
    fn strips_trailing_backslash_artifact() {
        assert_eq!(normalize("A history of cats\\"), "A history of cats");
        assert_eq!(normalize("A history of cats\\\\"), "A history of cats");
    }

    #[test]
    fn removes_unmatched_brackets_but_keeps_pairs() {
        assert_eq!(normalize("The title (2nd ed.)"), "The title (2nd ed.)");
        assert_eq!(normalize("The title (2nd ed."), "The title 2nd ed");
        assert_eq!(normalize("]The title["), "The title");
        assert_eq!(normalize("a [b (c)] d"), "a [b (c)] d");
    }

    #[test]
    fn collapses_punctuation_runs() {
        assert_eq!(normalize("war -- and peace"), "war and peace");
        assert_eq!(normalize("dots... everywhere,, yes"), "dots everywhere yes");
        assert_eq!(normalize("Title: subtitle"), "Title: subtitle");
    }

    #[test]
    fn trims_outer_punctuation_and_whitespace() {
        assert_eq!(normalize("  ...The title!?  "), "The title");
        // Balanced trailing parentheses are content, not trailing punctuation
        assert_eq!(normalize("The title (1995)"), "The title (1995)");
    }

    #[test]
    fn case_styles() {
        assert_eq!(capitalize_first("war and peace"), "War and peace");
        assert_eq!(title_case("wAr aNd peace"), "War And Peace");
        assert_eq!(
            normalize_with_case("the left hand of darkness", CaseStyle::Sentence),
            "The left hand of darkness"
        );
    }

    // Property-style checks over seeded random noise: idempotence and
    // bracket balance must hold for arbitrary garbage input.
    #[test]
    fn normalize_is_idempotent_and_balanced_on_random_input() {
        const ALPHABET: &[char] = &[
            'a', 'b', 'c', 'Z', '0', '9', ' ', ' ', '(', ')', '[', ']', '{', '}', '.', ',', ';',
            ':', '!', '?', '-', '_', '/', '\\', '"', '\'', '&', '#', '1', '3',
        ];
        const FRAGMENTS: &[&str] = &["&amp;", "&#13", "&quot", "&lt;", "((", "))", "[)", " -- "];

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let mut s = String::new();
            for _ in 0..rng.gen_range(0..40) {
                if rng.gen_bool(0.15) {
                    s.push_str(FRAGMENTS[rng.gen_range(0..FRAGMENTS.len())]);
                } else {
                    s.push(ALPHABET[rng.gen_range(0..ALPHABET.len())]);
                }
            }
            let once = normalize(&s);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for input {:?}", s);
            assert!(brackets_balanced(&once), "unbalanced output {:?} for {:?}", once, s);
        }
    }

    #[test]
    fn no_entities_remain_after_normalization() {
        for raw in [
            "a &amp; b",
            "a &amp;amp; b",
            "x&#13;y&#10;z",
            "&quot;quoted&quot;",
            "&#39;single&#39;",
        ] {
            let out = normalize(raw);
            assert!(!out.contains("&amp"), "{:?}", out);
            assert!(!out.contains("&#"), "{:?}", out);
            assert!(!out.contains("&quot"), "{:?}", out);
        }
    }
}
