use log::warn;
use reqwest::{header::LOCATION, Response};
use url::Url;

/// Ordered list of urls reached through `Location` headers, excluding the url of the request
/// that started the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectChain(Vec<Url>);

impl RedirectChain {
    pub fn new() -> Self {
        RedirectChain(Vec::new())
    }

    pub fn push(&mut self, url: Url) {
        self.0.push(url);
    }

    pub fn first(&self) -> Option<&Url> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&Url> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Url> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Url> {
        self.0
    }

    /// The final landing url, if the last hop points at the same host and port as `service`.
    pub fn landed_on(&self, service: &Url) -> Option<&Url> {
        self.last().filter(|url| same_host(url, service))
    }
}

impl From<Vec<Url>> for RedirectChain {
    fn from(urls: Vec<Url>) -> Self {
        RedirectChain(urls)
    }
}

impl<'a> IntoIterator for &'a RedirectChain {
    type Item = &'a Url;
    type IntoIter = std::slice::Iter<'a, Url>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

pub fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Resolved target of a 30x response, `None` for anything that does not continue the chain.
pub fn next_hop(response: &Response) -> Option<Url> {
    if !response.status().is_redirection() {
        return None;
    }
    let Some(location) = response.headers().get(LOCATION) else {
        warn!("{} from {} carries no Location header", response.status(), response.url());
        return None;
    };
    let location = match location.to_str() {
        Ok(location) => location,
        Err(e) => {
            warn!("Location header from {} is not valid text: {}", response.url(), e);
            return None;
        }
    };
    match response.url().join(location) {
        Ok(url) => Some(url),
        Err(e) => {
            warn!("Failed to resolve Location `{}` against {}: {}", location, response.url(), e);
            None
        }
    }
}

/// An `/authorize` hop that lost its query string gets the one the first hop carried.
///
/// Only the first hop's query is ever used, even when several `/authorize` hops appear.
pub fn restore_authorize_query(target: &mut Url, chain: &RedirectChain) {
    if target.query().is_some() || !target.path().ends_with("/authorize") {
        return;
    }
    if let Some(query) = chain.first().and_then(|first| first.query()) {
        target.set_query(Some(query));
    }
}
