use url::Url;

/// Query parameters that carry cache-busters or request timestamps rather
/// than identity.
const VOLATILE_PARAMS: [&str; 6] = ["timestamp", "ts", "_t", "time", "rand", "random"];

/// Canonicalize a URL for deduplication: drop the fragment, strip volatile
/// query parameters, and rely on the parser's canonical form (lowercased
/// scheme and host). Idempotent: `normalize_url(normalize_url(u)) ==
/// normalize_url(u)`.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_lowercase();
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !VOLATILE_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        drop(pairs);
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_volatile_params() {
        assert_eq!(
            normalize_url("https://a.test/x?ts=1"),
            "https://a.test/x"
        );
        assert_eq!(
            normalize_url("https://a.test/x?ts=2"),
            "https://a.test/x"
        );
        assert_eq!(
            normalize_url("https://a.test/x?id=7&timestamp=99&rand=3"),
            "https://a.test/x?id=7"
        );
    }

    #[test]
    fn test_drops_fragment() {
        assert_eq!(
            normalize_url("https://a.test/x#section-2"),
            "https://a.test/x"
        );
    }

    #[test]
    fn test_host_and_scheme_case_insensitive() {
        assert_eq!(
            normalize_url("HTTPS://A.Test/path"),
            normalize_url("https://a.test/path")
        );
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://a.test/x?ts=1&id=2#frag",
            "http://B.example/Path?random=9",
            "not a url at all",
        ];
        for input in inputs {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_unparseable_input_falls_back_to_lowercase() {
        assert_eq!(normalize_url("  NOT A URL "), "not a url");
    }
}
