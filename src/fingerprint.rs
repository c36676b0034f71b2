//! Fingerprint normalization and comparison.
//!
//! A fingerprint is the identifying string of an item (typically a serial
//! number). All comparisons run on the normalized form: lower-cased,
//! ASCII-folded, whitespace stripped. Items whose fingerprint normalizes to
//! the empty string never participate in matching.

/// Minimum normalized length for the fuzzy tier. Short serials produce too
/// many accidental near-misses to be a useful signal.
pub const FUZZY_MIN_LEN: usize = 6;

/// Normalizes a raw identifying string into its comparable form.
///
/// Lower-cases, folds Latin-1 diacritics to their ASCII base letter, drops
/// any remaining non-ASCII characters, and strips all whitespace (serial
/// numbers are compared without separators).
///
/// # Examples
///
/// ```
/// use proxim::fingerprint::normalize;
///
/// assert_eq!(normalize("WTU 123-456"), "wtu123-456");
/// assert_eq!(normalize("  wtu123456789 "), "wtu123456789");
/// assert_eq!(normalize("Série-École"), "serie-ecole");
/// assert_eq!(normalize(" \t\n"), "");
/// ```
#[must_use]
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_whitespace() {
            continue;
        }
        for folded in fold_char(c) {
            out.push(folded.to_ascii_lowercase());
        }
    }
    out
}

/// Folds a single character to zero or one ASCII characters.
fn fold_char(c: char) -> Option<char> {
    if c.is_ascii() {
        return Some(c);
    }
    let folded = match c {
        'à'..='å' | 'À'..='Å' => 'a',
        'ç' | 'Ç' => 'c',
        'è'..='ë' | 'È'..='Ë' => 'e',
        'ì'..='ï' | 'Ì'..='Ï' => 'i',
        'ñ' | 'Ñ' => 'n',
        'ò'..='ö' | 'Ò'..='Ö' | 'ø' | 'Ø' => 'o',
        'ù'..='ü' | 'Ù'..='Ü' => 'u',
        'ý' | 'ÿ' | 'Ý' => 'y',
        'ß' => 's',
        _ => return None,
    };
    Some(folded)
}

/// Returns true if the Levenshtein distance between `a` and `b` is at most 1.
///
/// This is the whole fuzzy-tier predicate, so it is specialized rather than
/// computing a full distance matrix: a length difference above one can never
/// qualify, and within that bound a single forward scan suffices.
#[must_use]
pub fn within_edit_distance_one(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (&a_chars, &b_chars)
    } else {
        (&b_chars, &a_chars)
    };

    match long.len() - short.len() {
        0 => {
            // Same length: exactly one substitution allowed.
            let mismatches = short
                .iter()
                .zip(long.iter())
                .filter(|(x, y)| x != y)
                .count();
            mismatches <= 1
        }
        1 => {
            // One insertion: skip the first divergence in the longer string.
            let mut i = 0;
            let mut j = 0;
            let mut skipped = false;
            while i < short.len() && j < long.len() {
                if short[i] == long[j] {
                    i += 1;
                    j += 1;
                } else if skipped {
                    return false;
                } else {
                    skipped = true;
                    j += 1;
                }
            }
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_case_and_whitespace() {
        assert_eq!(normalize("WTU123456789"), "wtu123456789");
        assert_eq!(normalize("wtu123456789 "), "wtu123456789");
        assert_eq!(normalize("WTU 123 456 789"), "wtu123456789");
        assert_eq!(normalize("\tWTU\n123 "), "wtu123");
    }

    #[test]
    fn normalize_folds_diacritics() {
        assert_eq!(normalize("Zürich-42"), "zurich-42");
        assert_eq!(normalize("Ångström"), "angstrom");
    }

    #[test]
    fn normalize_drops_unfoldable_chars() {
        assert_eq!(normalize("abc漢字def"), "abcdef");
    }

    #[test]
    fn normalize_empty_inputs() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("漢字"), "");
    }

    #[test]
    fn edit_distance_exact() {
        assert!(within_edit_distance_one("abc123", "abc123"));
    }

    #[test]
    fn edit_distance_substitution() {
        assert!(within_edit_distance_one("abc123", "abd123"));
        assert!(!within_edit_distance_one("abc123", "abd124"));
    }

    #[test]
    fn edit_distance_insertion_deletion() {
        assert!(within_edit_distance_one("abc123", "abc1234"));
        assert!(within_edit_distance_one("abc1234", "abc123"));
        assert!(within_edit_distance_one("bc123", "abc123"));
        assert!(!within_edit_distance_one("abc123", "abc12345"));
    }

    #[test]
    fn edit_distance_disjoint() {
        assert!(!within_edit_distance_one("aaaaaa", "bbbbbb"));
    }
}
