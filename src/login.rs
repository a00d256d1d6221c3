use log::{debug, info};
use reqwest::{Method, StatusCode};
use url::Url;

use crate::{
    redirect::{next_hop, restore_authorize_query, RedirectChain},
    session::Session,
    utils::with_service,
};

mod crypto;
mod fingerprint;
mod form;
pub mod mfa;
pub mod qrcode;
mod tracer;

pub use crypto::{encrypt_password, process_password, wrap_password, ENCRYPTED_PASSWORD_PREFIX};
pub use fingerprint::{generate_fingerprint, BrowserProfile, Fingerprint};
pub use form::{DynCodeLoginForm, LoginForm, PasswordLoginForm, QrLoginForm};
pub use mfa::{MfaChallenge, MfaDetection, MfaMethod, MfaStatus};
pub use qrcode::{QrChallenge, QrResponse, QrStatus};
pub use tracer::find_execution_tokens;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("Not logged in: {0}")]
    AuthenticationRequired(String),
    #[error("MFA challenge ended as {0:?}")]
    ChallengeRejected(MfaStatus),
    #[error("MFA endpoint {endpoint} failed: {reason}")]
    ChallengeTransport { endpoint: String, reason: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Failed to decode RSA public key: {0}")]
    KeyFormat(rsa::pkcs8::spki::Error),
    #[error("Failed to encrypt password: {0}")]
    Encryption(#[from] rsa::errors::Error),
    #[error("Password is {len} bytes, the key takes at most {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("MFA method {0} is not supported")]
    UnsupportedMethod(MfaMethod),
    #[error("MFA method {0} needs a verification code")]
    MissingCode(MfaMethod),
    #[error("Gave up after {0} redirects")]
    TooManyRedirects(usize),
    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a password login needs before the form can be submitted.
#[derive(Debug)]
pub enum PasswordStep {
    /// No MFA, submit right away.
    Ready(PasswordLoginForm),
    /// MFA must be satisfied with one of `detection.methods` first; the form already carries
    /// `detection.state` as `mfaState`.
    NeedsMfa { form: PasswordLoginForm, detection: MfaDetection },
}

/// One login attempt against the CAS gateway for a single target service.
///
/// Holds the `execution` tracer captured by `begin` so `complete` can echo it back.
pub struct OaLogin<'a> {
    session: &'a Session,
    execution: Option<String>,
}

impl<'a> OaLogin<'a> {
    pub fn new(session: &'a Session) -> Self {
        OaLogin { session, execution: None }
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    pub fn execution(&self) -> Option<&str> {
        self.execution.as_deref()
    }

    fn login_url(&self, target: &str) -> Result<Url> {
        Ok(with_service(&self.session.settings().cas("/login"), target)?)
    }

    /// Opens the login page for `target`. Returns `false` when the gateway answered without a
    /// single redirect, meaning the session is already authenticated for it.
    ///
    /// Otherwise the `execution` tracer of the landing page is kept for `complete`.
    pub async fn begin(&mut self, target: &str) -> Result<bool> {
        let url = self.login_url(target)?;
        debug!("begin login: {}", url);
        let followed = self.session.get_following(url).await?;
        if followed.chain.is_empty() {
            info!("Already authenticated for {}", target);
            return Ok(false);
        }
        let html = followed.response.text().await?;
        self.execution = find_execution_tokens(&html).into_iter().find(|value| !value.is_empty());
        debug!("execution tracer: {:?}", self.execution);
        Ok(true)
    }

    /// PEM text of the current login key. Fetched per attempt since the server may rotate it.
    pub async fn public_key(&self) -> Result<String> {
        let response = self.session.client().get(self.session.settings().cas("/jwt/publicKey")).send().await?;
        Ok(response.error_for_status()?.text().await?)
    }

    /// Fetches the key and returns the wrapped cipher text of `password`.
    pub async fn encrypt_password(&self, password: &str) -> Result<String> {
        let public_key = self.public_key().await?;
        process_password(password, &public_key)
    }

    /// Encrypts the password, asks whether MFA is needed and prepares the password form.
    pub async fn password_form(&self, username: &str, password: &str) -> Result<PasswordStep> {
        let cipher = self.encrypt_password(password).await?;
        debug!("encrypted password: {}", cipher);
        let detection = mfa::check_required(self.session, username, &cipher).await?;
        let form = PasswordLoginForm::new(username, &cipher, &detection.state);
        Ok(if detection.required {
            PasswordStep::NeedsMfa { form, detection }
        } else {
            PasswordStep::Ready(form)
        })
    }

    /// Submits `form` and walks the redirect chain hop by hop.
    ///
    /// Each hop is POSTed first and re-requested as GET on 405. An `/authorize` hop without a
    /// query string gets the first hop's query. An empty chain means the gateway accepted the
    /// form without redirecting, i.e. the session was already logged in.
    pub async fn complete(&self, target: &str, form: impl Into<LoginForm>) -> Result<RedirectChain> {
        let mut form = form.into();
        if let Some(execution) = &self.execution {
            form.set_execution(execution);
        }
        let url = self.login_url(target)?;
        debug!("submitting login form to {}", url);
        let mut response = self.session.manual().post(url).form(&form).send().await?;

        let max_redirects = self.session.settings().max_redirects;
        let mut chain = RedirectChain::new();
        while let Some(mut target) = next_hop(&response) {
            if chain.len() >= max_redirects {
                return Err(Error::TooManyRedirects(chain.len()));
            }
            restore_authorize_query(&mut target, &chain);
            chain.push(target.clone());

            let mut last_method = Method::POST;
            response = self.session.manual().post(target.clone()).send().await?;
            if response.status() == StatusCode::METHOD_NOT_ALLOWED {
                last_method = Method::GET;
                response = self.session.manual().get(target.clone()).send().await?;
            }
            debug!("{} {} -> {}", last_method, target, response.status());
        }
        info!("login finished after {} redirect(s)", chain.len());
        Ok(chain)
    }
}
