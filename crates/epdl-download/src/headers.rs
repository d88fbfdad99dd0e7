//! Request header hygiene for media hosts.
//!
//! Hosts commonly reject requests that do not look like they come from a
//! browser page. These helpers add the missing pieces without overriding
//! anything the source plugin set explicitly.

use url::Url;

use epdl_core::HeaderList;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

pub fn set_if_absent(headers: &mut HeaderList, name: &str, value: impl Into<String>) {
    if header_value(headers, name).is_none() {
        headers.push((name.to_string(), value.into()));
    }
}

pub fn remove_header(headers: &mut HeaderList, name: &str) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
}

/// `scheme://host[:port]` of a URL.
pub fn origin_of(url: &str) -> Option<String> {
    let origin = Url::parse(url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Headers for direct progressive downloads.
pub fn for_progressive(headers: &[(String, String)]) -> HeaderList {
    let mut out = headers.to_vec();
    set_if_absent(&mut out, "User-Agent", BROWSER_USER_AGENT);
    out
}

/// Headers for native HLS fetches.
///
/// Drops `X-Requested-With`, which some CDNs treat as an app fingerprint,
/// and fills in `Referer`/`Origin` from the manifest URL.
pub fn for_native_hls(headers: &[(String, String)], media_url: &str) -> HeaderList {
    let mut out = headers.to_vec();
    remove_header(&mut out, "X-Requested-With");
    set_if_absent(&mut out, "User-Agent", BROWSER_USER_AGENT);
    if let Some(origin) = origin_of(media_url) {
        set_if_absent(&mut out, "Referer", format!("{origin}/"));
        set_if_absent(&mut out, "Origin", origin);
    }
    out
}

/// Headers injected into remux sessions.
///
/// `Origin` comes from an explicit `Origin`, else from the `Referer`.
pub fn for_remux(headers: &[(String, String)], media_url: &str) -> HeaderList {
    let mut out = headers.to_vec();
    set_if_absent(&mut out, "User-Agent", BROWSER_USER_AGENT);
    if header_value(&out, "Referer").is_none() {
        if let Some(origin) = origin_of(media_url) {
            out.push(("Referer".to_string(), format!("{origin}/")));
        }
    }
    if header_value(&out, "Origin").is_none() {
        let derived = header_value(&out, "Referer").and_then(origin_of);
        if let Some(origin) = derived {
            out.push(("Origin".to_string(), origin));
        }
    }
    out
}

/// Serialize headers as a CRLF-terminated block, the form remux tools accept.
pub fn to_header_blob(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}\r\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderList {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn origin_keeps_non_default_port() {
        assert_eq!(
            origin_of("https://cdn.example.com/a/b.m3u8"),
            Some("https://cdn.example.com".to_string())
        );
        assert_eq!(
            origin_of("http://127.0.0.1:8090/stream"),
            Some("http://127.0.0.1:8090".to_string())
        );
        assert_eq!(origin_of("magnet:?xt=urn:btih:abc"), None);
    }

    #[test]
    fn hls_headers_drop_requested_with_and_synthesize_referer() {
        let out = for_native_hls(
            &headers(&[("X-Requested-With", "com.app"), ("Cookie", "a=b")]),
            "https://cdn.example.com/v/index.m3u8",
        );
        assert!(header_value(&out, "x-requested-with").is_none());
        assert_eq!(header_value(&out, "Cookie"), Some("a=b"));
        assert_eq!(header_value(&out, "Referer"), Some("https://cdn.example.com/"));
        assert_eq!(header_value(&out, "Origin"), Some("https://cdn.example.com"));
        assert_eq!(header_value(&out, "User-Agent"), Some(BROWSER_USER_AGENT));
    }

    #[test]
    fn explicit_headers_are_not_overridden() {
        let out = for_native_hls(
            &headers(&[("user-agent", "custom"), ("Referer", "https://site.example/watch")]),
            "https://cdn.example.com/index.m3u8",
        );
        assert_eq!(header_value(&out, "User-Agent"), Some("custom"));
        assert_eq!(header_value(&out, "Referer"), Some("https://site.example/watch"));
    }

    #[test]
    fn remux_origin_derives_from_referer() {
        let out = for_remux(
            &headers(&[("Referer", "https://player.example.org/embed/1")]),
            "https://cdn.example.com/file.mp4",
        );
        assert_eq!(header_value(&out, "Origin"), Some("https://player.example.org"));
    }

    #[test]
    fn header_blob_is_crlf_terminated() {
        let blob = to_header_blob(&headers(&[("A", "1"), ("B", "2")]));
        assert_eq!(blob, "A: 1\r\nB: 2\r\n");
    }
}
