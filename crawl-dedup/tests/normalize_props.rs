use crawl_dedup::normalize_url;
use proptest::prelude::*;

fn arb_host() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9-]{0,10}\\.(test|example)"
}

fn arb_path() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z0-9]{1,8}", 0..4).prop_map(|segments| segments.join("/"))
}

fn arb_query() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        prop_oneof![
            // Volatile params that must be dropped.
            Just("ts=123".to_string()),
            Just("timestamp=456".to_string()),
            Just("rand=9".to_string()),
            Just("random=abc".to_string()),
            Just("_t=1".to_string()),
            Just("time=now".to_string()),
            // Identity-bearing params that must survive.
            "[a-z]{1,6}=[a-z0-9]{1,6}",
        ],
        0..5,
    )
    .prop_map(|pairs| pairs.join("&"))
}

proptest! {
    #[test]
    fn normalize_is_idempotent(
        host in arb_host(),
        path in arb_path(),
        query in arb_query(),
    ) {
        let raw = if query.is_empty() {
            format!("https://{host}/{path}")
        } else {
            format!("https://{host}/{path}?{query}")
        };
        let once = normalize_url(&raw);
        let twice = normalize_url(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalize_drops_all_volatile_params(
        host in arb_host(),
        path in arb_path(),
        query in arb_query(),
    ) {
        let raw = format!("https://{host}/{path}?{query}");
        let normalized = normalize_url(&raw);
        for param in ["timestamp=", "ts=", "_t=", "time=", "rand=", "random="] {
            let needle = format!("?{param}");
            let mid = format!("&{param}");
            prop_assert!(!normalized.contains(&needle), "{normalized} kept {param}");
            prop_assert!(!normalized.contains(&mid), "{normalized} kept {param}");
        }
    }

    #[test]
    fn normalize_is_case_insensitive_on_scheme_and_host(
        host in arb_host(),
        path in arb_path(),
    ) {
        let lower = format!("https://{}/{path}", host.to_lowercase());
        let upper = format!("HTTPS://{}/{path}", host.to_uppercase());
        prop_assert_eq!(normalize_url(&lower), normalize_url(&upper));
    }
}
