/// Keeps ASCII digits plus the ISBN-10 check character `X`.
pub fn clean(raw: &str) -> String {
    raw.chars()
        .filter_map(|c| {
            if c.is_ascii_digit() {
                Some(c)
            } else if c == 'x' || c == 'X' {
                Some('X')
            } else {
                None
            }
        })
        .collect()
}

/// Converts a cleaned ISBN-10 to ISBN-13. Inputs shorter than 10 characters
/// are zero-padded on the left (leading zeros get lost upstream).
pub fn isbn10_to_isbn13(isbn10: &str) -> Option<String> {
    if isbn10.len() > 10 || isbn10.is_empty() {
        return None;
    }
    let padded = format!("{:0>10}", isbn10);
    // Drop the ISBN-10 check character, prefix the GS1 "978" element
    let mut digits: Vec<u8> = Vec::with_capacity(13);
    for c in "978".chars().chain(padded.chars().take(9)) {
        digits.push(c.to_digit(10)? as u8);
    }
    let check = isbn13_check_digit(&digits);
    digits.push(check);
    Some(digits.iter().map(|d| char::from(b'0' + d)).collect())
}

/// Mod-10 check digit over 12 digits with alternating weights 1 and 3.
pub fn isbn13_check_digit(digits12: &[u8]) -> u8 {
    let sum: u32 = digits12
        .iter()
        .enumerate()
        .map(|(i, &d)| d as u32 * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    ((10 - sum % 10) % 10) as u8
}

/// Normalizes a raw candidate to a 13-digit ISBN. Candidates that are neither
/// 10 nor 13 characters after cleaning are dropped.
pub fn to_isbn13(raw: &str) -> Option<String> {
    let cleaned = clean(raw);
    match cleaned.len() {
        13 if cleaned.chars().all(|c| c.is_ascii_digit()) => Some(cleaned),
        10 => isbn10_to_isbn13(&cleaned),
        _ => None,
    }
}

/// Converts every valid-length candidate, keeping input order.
pub fn convert_all(raw: &[String]) -> Vec<String> {
    raw.iter().filter_map(|isbn| to_isbn13(isbn)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_isbn10_converts_correctly() {
        assert_eq!(
            isbn10_to_isbn13("0306406152").as_deref(),
            Some("9780306406157")
        );
    }

    #[test]
    fn check_digit_weighting() {
        let digits: Vec<u8> = vec![9, 7, 8, 0, 3, 0, 6, 4, 0, 6, 1, 5];
        assert_eq!(isbn13_check_digit(&digits), 7);
    }

    #[test]
    fn hyphens_and_check_x_are_handled() {
        assert_eq!(clean("0-8044-2957-X"), "080442957X");
        // 155404295X -> 9781554042951
        assert_eq!(
            to_isbn13("1-55404-295-X").as_deref(),
            Some("9781554042951")
        );
    }

    #[test]
    fn thirteen_digit_candidates_pass_through() {
        assert_eq!(
            to_isbn13("978-0-306-40615-7").as_deref(),
            Some("9780306406157")
        );
    }

    #[test]
    fn invalid_lengths_are_dropped() {
        assert_eq!(to_isbn13("12345"), None);
        assert_eq!(to_isbn13(""), None);
        assert_eq!(to_isbn13("97803064061579999"), None);
    }

    #[test]
    fn convert_all_keeps_order_and_drops_garbage() {
        let raw = vec![
            "0306406152".to_string(),
            "not an isbn".to_string(),
            "9780306406157".to_string(),
        ];
        assert_eq!(
            convert_all(&raw),
            vec!["9780306406157".to_string(), "9780306406157".to_string()]
        );
    }
}
