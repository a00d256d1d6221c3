use url::Url;

/// Joins two url fragments with exactly one `/` between them.
pub fn concat_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub fn timestamp_mill() -> i64 {
    chrono::Local::now().timestamp_millis()
}

/// First value of query parameter `key`, already percent-decoded.
pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// `<base>?service=<target>`, with `target` form-encoded.
pub fn with_service(base: &str, target: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut().append_pair("service", target);
    Ok(url)
}
