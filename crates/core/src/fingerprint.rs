/// Number of digest bytes kept in a fingerprint (16 hex characters).
pub const FINGERPRINT_BYTES: usize = 8;

/// Short, deterministic digest of a query used to deduplicate cache entries.
/// Not meant for integrity checks.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(text.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash.as_bytes()[..FINGERPRINT_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fingerprint_has_fixed_length() {
        for text in ["", "a", "什么是社区报告？", "tab\tnewline\n\u{0}"] {
            let fp = fingerprint(text);
            assert_eq!(fp.len(), FINGERPRINT_BYTES * 2);
            assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn fingerprint_is_stable_across_calls() {
        // blake3("") starts with af1349b9f5f9a1a6
        assert_eq!(fingerprint(""), "af1349b9f5f9a1a6");
        assert_eq!(fingerprint("who founded the company?"), fingerprint("who founded the company?"));
    }

    #[test]
    fn whitespace_changes_fingerprint() {
        assert_ne!(fingerprint("query"), fingerprint("query "));
    }

    proptest! {
        #[test]
        fn equal_text_equal_fingerprint(text in ".*") {
            let copy = text.clone();
            prop_assert_eq!(fingerprint(&text), fingerprint(&copy));
        }

        #[test]
        fn distinct_text_distinct_fingerprint(a in ".{0,64}", b in ".{0,64}") {
            prop_assume!(a != b);
            prop_assert_ne!(fingerprint(&a), fingerprint(&b));
        }
    }
}
