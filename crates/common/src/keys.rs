//! Object storage key construction.

/// Build an object storage key from path segments.
///
/// Segments are joined with `/`, runs of separators collapse to one, and a
/// single leading separator is removed unless the key is just `/`.
///
/// ```
/// use cert_updater_common::build_key;
///
/// assert_eq!(build_key(&["certs", "example.com", "cert.pem"]), "certs/example.com/cert.pem");
/// assert_eq!(build_key(&["", "example.com.json"]), "example.com.json");
/// assert_eq!(build_key(&["a/", "/b/"]), "a/b/");
/// ```
pub fn build_key<S: AsRef<str>>(segments: &[S]) -> String {
    let mut key = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            push_segment(&mut key, "/");
        }
        push_segment(&mut key, segment.as_ref());
    }

    if key.len() > 1 && key.starts_with('/') {
        key.remove(0);
    }
    key
}

fn push_segment(key: &mut String, segment: &str) {
    for c in segment.chars() {
        if c == '/' && key.ends_with('/') {
            continue;
        }
        key.push(c);
    }
}
