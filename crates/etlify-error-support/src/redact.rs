//! Functions to redact strings to remove PII before logging them

/// Redact a URL, replacing all characters other than [`:`, `/`] with `x`
pub fn redact_url(url: &str) -> String {
    url.replace(|ch| ch != ':' && ch != '/', "x")
}

/// Redact compact jwe string (Five base64 segments, separated by `.` chars)
pub fn redact_compact_jwe(url: &str) -> String {
    url.replace(|ch| ch != '.', "x")
}

/// Redact a bearer token for logging, keeping only the scheme and a short
/// prefix of the secret so log lines can still be correlated without
/// leaking the CRM credential.
pub fn redact_bearer_token(header_value: &str) -> String {
    match header_value.split_once(' ') {
        Some((scheme, token)) if !token.is_empty() => {
            let visible: String = token.chars().take(4).collect();
            format!("{scheme} {visible}***")
        }
        _ => "***".to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("http://some.website.com/index.html"),
            "xxxx://xxxxxxxxxxxxxxxx/xxxxxxxxxx"
        );
        assert_eq!(
            redact_url("http://some.website.com:8000/foo/bar/baz"),
            "xxxx://xxxxxxxxxxxxxxxx:xxxx/xxx/xxx/xxx"
        );
    }

    #[test]
    fn test_redact_compact_jwe() {
        assert_eq!(redact_compact_jwe("abc.1234.x3243"), "xxx.xxxx.xxxxx")
    }

    #[test]
    fn test_redact_bearer_token() {
        assert_eq!(
            redact_bearer_token("Bearer pat_abcdefgh12345"),
            "Bearer pat_***"
        );
        assert_eq!(redact_bearer_token("garbage"), "***");
    }
}
