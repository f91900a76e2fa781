use url::Url;

/// Parses `input` as an absolute `http`/`https` URL.
pub fn parse_http_url(input: &str) -> Option<Url> {
    let url = Url::parse(input.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

pub fn is_http_url(input: &str) -> bool {
    parse_http_url(input).is_some()
}
