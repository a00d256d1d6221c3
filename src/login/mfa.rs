use std::{collections::BTreeSet, fmt};

use log::{debug, info};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{session::Session, utils::concat_url};

use super::{Error, Result};

/// Out-of-band verification channel. The wire value doubles as the url path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MfaMethod {
    /// Push notification to the mobile app.
    #[serde(rename = "apppush")]
    AppPush,
    #[serde(rename = "securephone")]
    Sms,
    #[serde(rename = "secureemail")]
    Email,
    /// Scan a code with the mobile app.
    #[serde(rename = "qrcode")]
    QrCode,
    /// Still advertised by the server but no longer usable.
    #[serde(rename = "faceverify")]
    FaceVerify,
}

impl MfaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMethod::AppPush => "apppush",
            MfaMethod::Sms => "securephone",
            MfaMethod::Email => "secureemail",
            MfaMethod::QrCode => "qrcode",
            MfaMethod::FaceVerify => "faceverify",
        }
    }

    /// SMS and email are confirmed with a code typed by the user, the rest by polling.
    pub fn needs_code(&self) -> bool {
        matches!(self, MfaMethod::Sms | MfaMethod::Email)
    }

    fn ensure_supported(self) -> Result<Self> {
        match self {
            MfaMethod::FaceVerify => Err(Error::UnsupportedMethod(self)),
            _ => Ok(self),
        }
    }
}

impl fmt::Display for MfaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum MfaStatus {
    Initialize,
    Sent,
    Valid,
    Invalid,
    Cancelled,
    Expired,
}

impl TryFrom<u8> for MfaStatus {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(MfaStatus::Initialize),
            1 => Ok(MfaStatus::Sent),
            2 => Ok(MfaStatus::Valid),
            3 => Ok(MfaStatus::Invalid),
            5 => Ok(MfaStatus::Cancelled),
            9 => Ok(MfaStatus::Expired),
            other => Err(format!("unknown MFA status {}", other)),
        }
    }
}

impl MfaStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MfaStatus::Valid | MfaStatus::Invalid | MfaStatus::Cancelled | MfaStatus::Expired)
    }

    /// `Err(ChallengeRejected)` for invalid, cancelled and expired; the status otherwise.
    pub fn into_result(self) -> Result<Self> {
        match self {
            MfaStatus::Invalid | MfaStatus::Cancelled | MfaStatus::Expired => Err(Error::ChallengeRejected(self)),
            _ => Ok(self),
        }
    }
}

/// The server sends either a flag or a masked contact string for these fields.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FlagOrText {
    Flag(bool),
    Text(String),
}

impl FlagOrText {
    pub fn text(&self) -> Option<&str> {
        match self {
            FlagOrText::Text(text) if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetectData {
    #[serde(rename = "need", default)]
    need: bool,
    #[serde(default)]
    state: String,
    #[serde(rename = "mfaEnabled", default)]
    mfa_enabled: bool,
    #[serde(rename = "mfaTypeAppPush", default)]
    app_push: bool,
    #[serde(rename = "mfaTypeSecurePhone", default)]
    secure_phone: bool,
    #[serde(rename = "mfaTypeSecureEmail", default)]
    secure_email: bool,
    #[serde(rename = "mfaTypeQrCode", default)]
    qr_code: bool,
    #[serde(rename = "mfaTypeFaceVerify", default)]
    face_verify: bool,
}

#[derive(Debug, Deserialize)]
struct InitData {
    #[serde(rename = "securePhone")]
    secure_phone: Option<FlagOrText>,
    #[serde(rename = "secureEmail")]
    secure_email: Option<FlagOrText>,
    #[serde(rename = "qrCode")]
    qr_code: Option<FlagOrText>,
    #[serde(rename = "attestServerUrl")]
    attest_server_url: String,
    gid: String,
}

#[derive(Debug, Deserialize)]
struct SendData {
    #[serde(rename = "callbackCode")]
    callback_code: Option<String>,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    status: MfaStatus,
}

#[derive(Serialize)]
struct GidBody<'a> {
    gid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
}

/// Outcome of `/mfa/detect`.
#[derive(Debug, Clone)]
pub struct MfaDetection {
    pub required: bool,
    pub enabled: bool,
    /// Echoed as `mfaState` in the final login form and passed to `init_challenge`.
    pub state: String,
    pub methods: BTreeSet<MfaMethod>,
}

/// One in-flight verification.
#[derive(Debug, Clone)]
pub struct MfaChallenge {
    pub method: MfaMethod,
    pub gid: String,
    pub attest_server_url: String,
    pub state: String,
    pub status: MfaStatus,
    /// Masked phone number the SMS goes to.
    pub secure_phone: Option<String>,
    /// Masked address the email goes to.
    pub secure_email: Option<String>,
    /// QR payload for `MfaMethod::QrCode`.
    pub qr_code: Option<String>,
    /// `callbackCode` or `result` from the send call.
    pub send_receipt: Option<String>,
}

impl MfaChallenge {
    fn guard_url(&self, action: &str) -> String {
        concat_url(&self.attest_server_url, &format!("/api/guard/{}/{}", self.method, action))
    }
}

fn challenge_error(endpoint: &str, reason: impl fmt::Display) -> Error {
    Error::ChallengeTransport { endpoint: endpoint.to_string(), reason: reason.to_string() }
}

async fn read_envelope<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> Result<T> {
    let response = response.error_for_status().map_err(|e| challenge_error(endpoint, e))?;
    let text = response.text().await.map_err(|e| challenge_error(endpoint, e))?;
    debug!("{} responded: {}", endpoint, text);
    let envelope: Envelope<T> =
        serde_json::from_str(&text).map_err(|e| challenge_error(endpoint, format!("{}. Text: {}", e, text)))?;
    envelope.data.ok_or_else(|| {
        challenge_error(
            endpoint,
            format!("no data in response (code {}, message {:?})", envelope.code, envelope.message),
        )
    })
}

async fn post_guard<T: DeserializeOwned>(session: &Session, endpoint: &str, body: &GidBody<'_>) -> Result<T> {
    let response = session
        .client()
        .post(endpoint)
        .json(body)
        .send()
        .await
        .map_err(|e| challenge_error(endpoint, e))?;
    read_envelope(endpoint, response).await
}

/// Asks the server whether this account must pass MFA, and with which methods.
pub async fn check_required(session: &Session, username: &str, password_cipher: &str) -> Result<MfaDetection> {
    let endpoint = session.settings().cas("/mfa/detect");
    let response = session
        .client()
        .post(&endpoint)
        .form(&[("username", username), ("password", password_cipher)])
        .send()
        .await
        .map_err(|e| challenge_error(&endpoint, e))?;
    let data: DetectData = read_envelope(&endpoint, response).await?;

    let methods = [
        (data.app_push, MfaMethod::AppPush),
        (data.secure_phone, MfaMethod::Sms),
        (data.secure_email, MfaMethod::Email),
        (data.qr_code, MfaMethod::QrCode),
        (data.face_verify, MfaMethod::FaceVerify),
    ]
    .into_iter()
    .filter_map(|(enrolled, method)| enrolled.then_some(method))
    .collect();

    info!("MFA required: {}", data.need);
    Ok(MfaDetection { required: data.need, enabled: data.mfa_enabled, state: data.state, methods })
}

/// Opens a challenge for `method` under the `state` returned by `check_required`.
pub async fn init_challenge(session: &Session, method: MfaMethod, state: &str) -> Result<MfaChallenge> {
    let method = method.ensure_supported()?;
    let endpoint = session.settings().cas(&format!("/mfa/initByType/{}", method));
    let response = session
        .client()
        .get(&endpoint)
        .query(&[("state", state)])
        .send()
        .await
        .map_err(|e| challenge_error(&endpoint, e))?;
    let data: InitData = read_envelope(&endpoint, response).await?;
    debug!("MFA challenge {} opened on {}", data.gid, data.attest_server_url);

    Ok(MfaChallenge {
        method,
        gid: data.gid,
        attest_server_url: data.attest_server_url,
        state: state.to_string(),
        status: MfaStatus::Initialize,
        secure_phone: data.secure_phone.as_ref().and_then(FlagOrText::text).map(str::to_string),
        secure_email: data.secure_email.as_ref().and_then(FlagOrText::text).map(str::to_string),
        qr_code: data.qr_code.as_ref().and_then(FlagOrText::text).map(str::to_string),
        send_receipt: None,
    })
}

/// Triggers delivery of the push, SMS or email. A QR challenge has nothing to send.
pub async fn send(session: &Session, challenge: &mut MfaChallenge) -> Result<()> {
    if challenge.method.ensure_supported()? == MfaMethod::QrCode {
        debug!("QR challenge {} needs no send, poll verify instead", challenge.gid);
        return Ok(());
    }
    let endpoint = challenge.guard_url("send");
    let data: SendData = post_guard(session, &endpoint, &GidBody { gid: &challenge.gid, code: None }).await?;
    challenge.send_receipt = data.callback_code.or(data.result);
    challenge.status = MfaStatus::Sent;
    info!("MFA {} sent for challenge {}", challenge.method, challenge.gid);
    Ok(())
}

/// Reports the challenge status once. SMS and email need the code the user received.
///
/// A rejected challenge comes back as `Ok(MfaStatus::Invalid)` etc., never as an error, and is
/// not retried here; see `MfaStatus::into_result`.
pub async fn verify(session: &Session, challenge: &mut MfaChallenge, code: Option<&str>) -> Result<MfaStatus> {
    let method = challenge.method.ensure_supported()?;
    let (action, code) = if method.needs_code() {
        ("valid", Some(code.ok_or(Error::MissingCode(method))?))
    } else {
        ("status", None)
    };
    let endpoint = challenge.guard_url(action);
    let data: StatusData = post_guard(session, &endpoint, &GidBody { gid: &challenge.gid, code }).await?;
    challenge.status = data.status;
    debug!("MFA challenge {} status: {:?}", challenge.gid, data.status);
    Ok(data.status)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, body_string_contains, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::settings::Settings;

    fn session_for(server: &MockServer) -> Session {
        Session::new(Settings { cas_url: format!("{}/cas", server.uri()), ..Settings::default() }).unwrap()
    }

    fn challenge(server: &MockServer, method: MfaMethod) -> MfaChallenge {
        MfaChallenge {
            method,
            gid: "g-1".to_string(),
            attest_server_url: format!("{}/attest", server.uri()),
            state: "st".to_string(),
            status: MfaStatus::Initialize,
            secure_phone: None,
            secure_email: None,
            qr_code: None,
            send_receipt: None,
        }
    }

    #[test]
    fn status_codes_map_to_states() {
        let status: MfaStatus = serde_json::from_value(json!(9)).unwrap();
        assert_eq!(status, MfaStatus::Expired);
        assert!(serde_json::from_value::<MfaStatus>(json!(8)).is_err());
        assert!(MfaStatus::Cancelled.is_terminal());
        assert!(!MfaStatus::Sent.is_terminal());
        assert!(matches!(MfaStatus::Invalid.into_result(), Err(Error::ChallengeRejected(MfaStatus::Invalid))));
        assert_eq!(MfaStatus::Valid.into_result().unwrap(), MfaStatus::Valid);
    }

    #[tokio::test]
    async fn detect_lists_enrolled_methods() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/cas/mfa/detect"))
            .and(body_string_contains("username=2021300000"))
            .and(body_string_contains("password=__RSA__"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {
                    "need": true, "state": "mfa-state", "mfaEnabled": true,
                    "mfaTypeSecurePhone": true, "mfaTypeQrCode": false, "mfaTypeAppPush": true,
                    "mfaTypeFaceVerify": false, "mfaTypeSecureEmail": false
                }
            })))
            .mount(&server).await;

        let detection = check_required(&session_for(&server), "2021300000", "__RSA__xyz").await.unwrap();
        assert!(detection.required);
        assert_eq!(detection.state, "mfa-state");
        assert_eq!(detection.methods, BTreeSet::from([MfaMethod::AppPush, MfaMethod::Sms]));
    }

    #[tokio::test]
    async fn init_reads_gid_and_attest_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/cas/mfa/initByType/securephone"))
            .and(query_param("state", "mfa-state"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": { "securePhone": "138****0000", "secureEmail": false, "qrCode": "",
                          "attestServerUrl": "https://attest.nwpu.edu.cn", "gid": "g-42" }
            })))
            .mount(&server).await;

        let challenge = init_challenge(&session_for(&server), MfaMethod::Sms, "mfa-state").await.unwrap();
        assert_eq!(challenge.gid, "g-42");
        assert_eq!(challenge.attest_server_url, "https://attest.nwpu.edu.cn");
        assert_eq!(challenge.secure_phone.as_deref(), Some("138****0000"));
        assert_eq!(challenge.secure_email, None);
        assert_eq!(challenge.qr_code, None);
        assert_eq!(challenge.status, MfaStatus::Initialize);
    }

    #[tokio::test]
    async fn face_verify_fails_fast() {
        let server = MockServer::start().await;
        let session = session_for(&server);
        assert!(matches!(
            init_challenge(&session, MfaMethod::FaceVerify, "st").await,
            Err(Error::UnsupportedMethod(MfaMethod::FaceVerify))
        ));
        let mut c = challenge(&server, MfaMethod::FaceVerify);
        assert!(matches!(send(&session, &mut c).await, Err(Error::UnsupportedMethod(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn app_push_send_then_poll() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/attest/api/guard/apppush/send"))
            .and(body_json(json!({ "gid": "g-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": { "callbackCode": "cb" } })))
            .expect(1)
            .mount(&server).await;
        Mock::given(method("POST")).and(path("/attest/api/guard/apppush/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": { "status": 2 } })))
            .mount(&server).await;

        let session = session_for(&server);
        let mut c = challenge(&server, MfaMethod::AppPush);
        send(&session, &mut c).await.unwrap();
        assert_eq!(c.status, MfaStatus::Sent);
        assert_eq!(c.send_receipt.as_deref(), Some("cb"));
        assert_eq!(verify(&session, &mut c, None).await.unwrap(), MfaStatus::Valid);
        assert_eq!(c.status, MfaStatus::Valid);
    }

    #[tokio::test]
    async fn sms_verify_posts_code_and_returns_invalid_as_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/attest/api/guard/securephone/valid"))
            .and(body_json(json!({ "gid": "g-1", "code": "000000" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": { "status": 3 } })))
            .expect(1)
            .mount(&server).await;

        let session = session_for(&server);
        let mut c = challenge(&server, MfaMethod::Sms);
        assert_eq!(verify(&session, &mut c, Some("000000")).await.unwrap(), MfaStatus::Invalid);
        assert_eq!(c.status, MfaStatus::Invalid);
    }

    #[tokio::test]
    async fn sms_verify_without_code_is_refused_locally() {
        let server = MockServer::start().await;
        let mut c = challenge(&server, MfaMethod::Email);
        assert!(matches!(
            verify(&session_for(&server), &mut c, None).await,
            Err(Error::MissingCode(MfaMethod::Email))
        ));
    }

    #[tokio::test]
    async fn server_errors_and_garbage_are_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/attest/api/guard/secureemail/send"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server).await;
        Mock::given(method("POST")).and(path("/attest/api/guard/apppush/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server).await;

        let session = session_for(&server);
        let mut email = challenge(&server, MfaMethod::Email);
        assert!(matches!(send(&session, &mut email).await, Err(Error::ChallengeTransport { .. })));
        assert_eq!(email.status, MfaStatus::Initialize);
        let mut push = challenge(&server, MfaMethod::AppPush);
        assert!(matches!(verify(&session, &mut push, None).await, Err(Error::ChallengeTransport { .. })));
    }

    #[tokio::test]
    async fn qr_challenge_send_is_a_no_op() {
        let server = MockServer::start().await;
        let mut c = challenge(&server, MfaMethod::QrCode);
        send(&session_for(&server), &mut c).await.unwrap();
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
