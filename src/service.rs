use std::{fmt, marker::PhantomData};

use log::debug;
use reqwest::Response;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use url::Url;

use crate::{login, redirect::RedirectChain, session::{Followed, Session}, utils};

pub mod bus;
pub mod classroom;
pub mod ecampus;
pub mod edu;
pub mod mail;
pub mod market;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),
    #[error("Failed to deserialize JSON: {0}. Text: {1}")]
    SerdeJsonError(serde_json::Error, String),
    #[error("Unexpected shape of `{0}`: {1}")]
    ShapeError(&'static str, serde_json::Error),
    #[error("Service answered code {code}: {message}")]
    ServiceError { code: i64, message: String },
    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
    #[error(transparent)]
    LoginError(#[from] login::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::LoginError(err.into())
    }
}

/// Raw JSON for fields whose shape is not pinned down yet; decoded on demand with `get`.
#[derive(Clone, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Loose<T> {
    value: Value,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Default for Loose<T> {
    fn default() -> Self {
        Loose { value: Value::Null, _marker: PhantomData }
    }
}

impl<T> fmt::Debug for Loose<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: DeserializeOwned> Loose<T> {
    /// `None` when the field was absent or null.
    pub fn get(&self) -> Result<Option<T>> {
        if self.value.is_null() {
            return Ok(None);
        }
        T::deserialize(&self.value).map(Some).map_err(|e| Error::ShapeError(std::any::type_name::<T>(), e))
    }
}

impl<T> Loose<T> {
    pub fn raw(&self) -> &Value {
        &self.value
    }
}

/// `{success, code, msg, data}` envelope shared by the classroom and market services.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound = "")]
pub struct ApiResponse<T> {
    /// Boolean on some endpoints, a string on others.
    #[serde(default)]
    pub success: Option<Value>,
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Loose<T>,
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// The payload, or `ServiceError` when the service reported a failure or sent no data.
    pub fn into_data(self) -> Result<T> {
        let failed = matches!(self.success, Some(Value::Bool(false)));
        match self.data.get()? {
            Some(data) if !failed => Ok(data),
            _ => Err(Error::ServiceError { code: self.code, message: self.msg.unwrap_or_default() }),
        }
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let url = response.url().clone();
    let text = response.text().await?;
    debug!("{} responded: {}", url, text);
    serde_json::from_str(&text).map_err(|e| Error::SerdeJsonError(e, text))
}

pub(crate) fn serialize_date_dash<S: serde::Serializer>(date: &chrono::NaiveDate, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(&date.format("%Y-%m-%d"))
}

pub(crate) fn serialize_date_slash<S: serde::Serializer>(date: &chrono::NaiveDate, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(&date.format("%Y/%m/%d"))
}

/// Clone of the session headers plus `name: token`.
pub(crate) fn headers_with_token(session: &Session, name: &'static str, token: &str) -> Result<reqwest::header::HeaderMap> {
    let mut headers = session.headers();
    headers.insert(name, token.parse()?);
    Ok(headers)
}

pub(crate) fn parse_base(base: &str) -> Result<Url> {
    Ok(Url::parse(base)?)
}

/// GETs the CAS login url for `target` and follows every redirect.
pub(crate) async fn follow_cas(session: &Session, target: &str) -> Result<Followed> {
    let url = utils::with_service(&session.settings().cas("/login"), target)?;
    Ok(session.get_following(url).await?)
}

/// `token` query parameter of the last hop, if the chain ends on `service`.
pub fn query_token(chain: &RedirectChain, service: &Url) -> Option<String> {
    chain.landed_on(service).and_then(|url| utils::query_param(url, "token"))
}
