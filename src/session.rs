use std::sync::Arc;

use log::debug;
use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, HeaderValue, USER_AGENT},
    redirect, Response,
};
use url::Url;

use crate::{
    login::{Error, Result},
    redirect::{next_hop, RedirectChain},
    settings::Settings,
};

/// Cookie jar and default headers of one logical user.
///
/// A login sequence mutates the jar, so it must not overlap with another request on the same
/// session. Once logged in, service calls may run concurrently.
pub struct Session {
    client: reqwest::Client,
    manual: reqwest::Client,
    cookie_jar: Arc<Jar>,
    headers: HeaderMap,
    settings: Settings,
}

/// Response at the end of a followed redirect chain.
pub struct Followed {
    pub response: Response,
    pub chain: RedirectChain,
}

impl Session {
    pub fn new(settings: Settings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let user_agent = HeaderValue::from_str(&settings.user_agent)
            .map_err(|e| Error::MalformedResponse(format!("invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, user_agent);

        let cookie_jar = Arc::new(Jar::default());

        let client = reqwest::Client::builder()
            .default_headers(headers.clone())
            .cookie_provider(cookie_jar.clone())
            .redirect(redirect::Policy::limited(settings.max_redirects))
            .build()?;
        let manual = reqwest::Client::builder()
            .default_headers(headers.clone())
            .cookie_provider(cookie_jar.clone())
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Session { client, manual, cookie_jar, headers, settings })
    }

    /// Client that follows redirects on its own, for plain service calls.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Client that never follows redirects, for hop-by-hop login sequences.
    pub fn manual(&self) -> &reqwest::Client {
        &self.manual
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Default headers, cloned so a service client can add its own token header.
    pub fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    /// Stores a cookie as if `url` had set it, e.g. a previously saved CAS `SESSION`.
    pub fn with_cookie(&self, name: &str, value: &str, url: &Url) {
        self.cookie_jar.add_cookie_str(&format!("{}={}", name, value), url);
    }

    /// Value of cookie `name` that would be sent to `url`.
    pub fn cookie(&self, url: &Url, name: &str) -> Option<String> {
        let header = self.cookie_jar.cookies(url)?;
        let header = header.to_str().ok()?;
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    /// The CAS `SESSION` cookie, if one has been issued.
    pub fn cas_session_id(&self) -> Option<String> {
        let url = Url::parse(&self.settings.cas("/login")).ok()?;
        self.cookie(&url, "SESSION")
    }

    /// Restores a CAS `SESSION` cookie saved from an earlier login.
    pub fn set_cas_session_id(&self, value: &str) -> Result<()> {
        let url = Url::parse(&self.settings.cas("/login"))?;
        self.with_cookie("SESSION", value, &url);
        Ok(())
    }

    /// Single GET that leaves any redirect to the caller.
    pub async fn get_once(&self, url: Url) -> Result<Response> {
        debug!("GET (no redirect) {}", url);
        Ok(self.manual.get(url).send().await?)
    }

    /// GET `url` and keep following `Location` headers with GETs, recording every hop.
    pub async fn get_following(&self, url: Url) -> Result<Followed> {
        let mut chain = RedirectChain::new();
        let mut response = self.get_once(url).await?;
        while let Some(target) = next_hop(&response) {
            if chain.len() >= self.settings.max_redirects {
                return Err(Error::TooManyRedirects(chain.len()));
            }
            debug!("redirected to {}", target);
            chain.push(target.clone());
            response = self.get_once(target).await?;
        }
        Ok(Followed { response, chain })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn session_for(server: &MockServer) -> Session {
        let settings = Settings {
            cas_url: format!("{}/cas", server.uri()),
            max_redirects: 4,
            ..Settings::default()
        };
        Session::new(settings).unwrap()
    }

    #[tokio::test]
    async fn get_following_records_every_hop() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/a"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/b"))
            .mount(&server).await;
        Mock::given(method("GET")).and(path("/b"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/c?x=1"))
            .mount(&server).await;
        Mock::given(method("GET")).and(path("/c"))
            .respond_with(ResponseTemplate::new(200).set_body_string("done"))
            .mount(&server).await;

        let session = session_for(&server);
        let followed = session.get_following(Url::parse(&format!("{}/a", server.uri())).unwrap()).await.unwrap();
        let paths: Vec<_> = followed.chain.iter().map(|u| u.path().to_string()).collect();
        assert_eq!(paths, vec!["/b", "/c"]);
        assert_eq!(followed.chain.last().unwrap().query(), Some("x=1"));
        assert_eq!(followed.response.text().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn get_following_gives_up_on_loops() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/loop"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
            .mount(&server).await;

        let session = session_for(&server);
        let result = session.get_following(Url::parse(&format!("{}/loop", server.uri())).unwrap()).await;
        assert!(matches!(result, Err(Error::TooManyRedirects(4))));
    }

    #[tokio::test]
    async fn cookies_set_during_redirects_land_in_the_jar() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(200).insert_header("Set-Cookie", "SESSION=abc; Path=/"))
            .mount(&server).await;

        let session = session_for(&server);
        assert_eq!(session.cas_session_id(), None);
        session.get_once(Url::parse(&session.settings().cas("/login")).unwrap()).await.unwrap();
        assert_eq!(session.cas_session_id().as_deref(), Some("abc"));
    }

    #[test]
    fn restored_session_cookie_is_readable() {
        let session = Session::new(Settings::default()).unwrap();
        session.set_cas_session_id("restored").unwrap();
        assert_eq!(session.cas_session_id().as_deref(), Some("restored"));
    }
}
