//! Property checks for URL canonicalization, hashing, and href resolution.

use proptest::prelude::*;
use url::Url;

use crawlgrid::utils::{canonicalize_url, is_valid_url, resolve_href, url_hash};

fn generated_url(
    host: &str,
    segments: &[String],
    query: Option<&String>,
    fragment: Option<&String>,
) -> String {
    let mut url = format!("https://{host}");
    for segment in segments {
        url.push('/');
        url.push_str(segment);
    }
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

proptest! {
    #[test]
    fn canonicalization_is_idempotent(
        host in "[a-z]{1,12}\\.[a-z]{2,3}",
        segments in proptest::collection::vec("[a-z0-9]{1,8}", 0..4),
        query in proptest::option::of("[a-z]{1,6}=[a-z0-9]{1,6}"),
        fragment in proptest::option::of("[a-z0-9]{1,8}"),
    ) {
        let raw = generated_url(&host, &segments, query.as_ref(), fragment.as_ref());
        let once = canonicalize_url(&raw).expect("generated urls canonicalize");
        let twice = canonicalize_url(&once).expect("canonical urls canonicalize");
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(url_hash(&once), url_hash(&twice));
    }

    #[test]
    fn fragments_and_case_never_change_the_hash(
        host in "[a-z]{1,12}\\.[a-z]{2,3}",
        segment in "[a-z0-9]{1,8}",
        fragment in "[a-z0-9]{1,8}",
    ) {
        let plain = format!("https://{host}/{segment}");
        let with_fragment = format!("https://{host}/{segment}#{fragment}");
        let shouty = format!("HTTPS://{}/{segment}", host.to_uppercase());

        let canonical = canonicalize_url(&plain).expect("canonicalize");
        let hash = url_hash(&canonical);
        prop_assert_eq!(
            &hash,
            &url_hash(&canonicalize_url(&with_fragment).expect("canonicalize"))
        );
        prop_assert_eq!(
            &hash,
            &url_hash(&canonicalize_url(&shouty).expect("canonicalize"))
        );
    }

    #[test]
    fn hashes_are_sixteen_hex_chars(input in ".*") {
        let hash = url_hash(&input);
        prop_assert_eq!(hash.len(), 16);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn resolved_hrefs_are_always_crawlable(href in ".{0,40}") {
        let base = Url::parse("https://site.test/list/page").expect("static base");
        if let Some(resolved) = resolve_href(&base, &href) {
            prop_assert!(is_valid_url(&resolved));
            prop_assert!(!resolved.contains('#'), "fragments must be stripped");
        }
    }
}
