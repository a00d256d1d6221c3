use log::debug;
use rand::Rng;
use serde::Deserialize;

use crate::{session::Session, utils::timestamp_mill};

use super::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u8")]
pub enum QrStatus {
    #[default]
    Initialize,
    Sent,
    Valid,
    Invalid,
    Cancelled,
    Scanned,
    Expired,
}

impl TryFrom<u8> for QrStatus {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(QrStatus::Initialize),
            1 => Ok(QrStatus::Sent),
            2 => Ok(QrStatus::Valid),
            3 => Ok(QrStatus::Invalid),
            5 => Ok(QrStatus::Cancelled),
            8 => Ok(QrStatus::Scanned),
            9 => Ok(QrStatus::Expired),
            other => Err(format!("unknown QR status {}", other)),
        }
    }
}

impl QrStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QrStatus::Valid | QrStatus::Invalid | QrStatus::Cancelled | QrStatus::Expired)
    }
}

/// `accounts` comes as a single string or a list, depending on how many are bound to the app.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Accounts {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct QrCodeInfo {
    pub accounts: Option<Accounts>,
    #[serde(rename = "apptoken")]
    pub app_token: Option<String>,
    pub device: Option<String>,
    #[serde(default, deserialize_with = "status_or_default")]
    pub status: QrStatus,
    pub timestamp: i64,
}

fn status_or_default<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<QrStatus, D::Error> {
    Option::<QrStatus>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, Deserialize)]
pub struct QrData {
    #[serde(rename = "qrCode")]
    pub qr_code: QrCodeInfo,
    #[serde(rename = "stateKey")]
    pub state_key: String,
}

/// Body of both `/qr/init` and `/qr/comet`.
#[derive(Debug, Clone, Deserialize)]
pub struct QrResponse {
    pub code: i64,
    pub data: Option<QrData>,
    pub message: Option<String>,
}

impl QrResponse {
    /// `Initialize` when the server sent no data yet.
    pub fn status(&self) -> QrStatus {
        self.data.as_ref().map(|data| data.qr_code.status).unwrap_or_default()
    }
}

/// A freshly opened QR login.
#[derive(Debug, Clone)]
pub struct QrChallenge {
    /// Submitted as `qrCodeKey` once the scan is confirmed.
    pub qr_code_key: String,
    pub qr_code: QrCodeInfo,
}

async fn read_qr_response(response: reqwest::Response) -> Result<QrResponse> {
    let text = response.error_for_status()?.text().await?;
    debug!("QR response: {}", text);
    serde_json::from_str(&text).map_err(|e| Error::MalformedResponse(format!("{}. Text: {}", e, text)))
}

pub async fn qr_init(session: &Session) -> Result<QrChallenge> {
    let response = session.client().post(session.settings().cas("/qr/init")).send().await?;
    let response = read_qr_response(response).await?;
    let data = response.data.ok_or_else(|| {
        Error::MalformedResponse(format!("qr init returned no data: {:?}", response.message))
    })?;
    Ok(QrChallenge { qr_code_key: data.state_key, qr_code: data.qr_code })
}

/// Millisecond timestamp with up to 23ms of jitter so the image is never served from cache.
fn cache_buster() -> i64 {
    timestamp_mill() + rand::thread_rng().gen_range(0..24)
}

/// Raw image bytes of the current QR code.
pub async fn qr_image(session: &Session) -> Result<Vec<u8>> {
    let bytes = session
        .client()
        .get(session.settings().cas("/qr/qrcode"))
        .query(&[("r", cache_buster())])
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    Ok(bytes.to_vec())
}

/// One poll of the scan state. The caller decides the pace.
pub async fn qr_comet(session: &Session) -> Result<QrResponse> {
    let response = session.client().post(session.settings().cas("/qr/comet")).send().await?;
    read_qr_response(response).await
}
