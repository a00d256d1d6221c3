use std::collections::HashMap;

use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose},
    Engine as _,
};
use chrono::NaiveDate;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::header::HeaderMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    login,
    redirect::{next_hop, same_host},
    session::Session,
    utils::{concat_url, query_param, with_service},
};

use super::{headers_with_token, parse_base, read_json, serialize_date_dash, Loose, Result};

const TICKET_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    general_purpose::PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
const TICKET_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    general_purpose::PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn service_url(session: &Session) -> String {
    let base = &session.settings().services.ecampus;
    let path: String = url::form_urlencoded::byte_serialize(format!("{}/main.html#/", base).as_bytes()).collect();
    format!("{}/?path={}", base, path)
}

/// Extracts `idToken` from the JWT-like `header.payload.signature` ticket.
pub fn parse_token(ticket: &str) -> login::Result<String> {
    let payload = ticket
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| login::Error::MalformedResponse(format!("ticket has no payload segment: {}", ticket)))?;
    // `+` may have been turned into a space by query decoding
    let payload = payload.replace(' ', "+");
    let bytes = TICKET_STANDARD
        .decode(&payload)
        .or_else(|_| TICKET_URL_SAFE.decode(&payload))
        .map_err(|e| login::Error::MalformedResponse(format!("ticket payload is not base64: {}", e)))?;
    let json: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| login::Error::MalformedResponse(format!("ticket payload is not JSON: {}", e)))?;
    json.get("idToken")
        .and_then(|token| token.as_str())
        .map(str::to_string)
        .ok_or_else(|| login::Error::MalformedResponse("ticket payload has no idToken".to_string()))
}

/// Requests the CAS url without following it; the single redirect back to e-campus carries a
/// `ticket` whose payload holds the bearer token.
///
/// `Ok(None)` if the redirect goes anywhere else.
pub async fn authorize_and_extract_token(session: &Session) -> Result<Option<String>> {
    let url = with_service(&session.settings().cas("/login"), &service_url(session))?;
    let response = session.get_once(url).await?;
    let Some(location) = next_hop(&response) else {
        warn!("e-campus login answered {} without redirect", response.status());
        return Ok(None);
    };
    let ecampus = parse_base(&session.settings().services.ecampus)?;
    if !same_host(&location, &ecampus) {
        warn!("e-campus login redirected elsewhere: {}", location);
        return Ok(None);
    }
    let Some(ticket) = query_param(&location, "ticket") else {
        warn!("e-campus redirect carries no ticket: {}", location);
        return Ok(None);
    };
    debug!("e-campus ticket: {}", ticket);
    Ok(Some(parse_token(&ticket)?))
}

/// `{code, message, data}` envelope of the portal services.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound = "")]
pub struct EcampusResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    /// Only sent by the user info endpoint, misspelled.
    #[serde(rename = "acknowleged", default)]
    pub acknowledged: Option<bool>,
    #[serde(default)]
    pub data: Loose<T>,
}

/// Counts arrive as numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Count {
    Number(i64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSummary {
    #[serde(rename = "newEmailAmount")]
    pub new_email_amount: Option<Count>,
    #[serde(rename = "barbageEmailAmount")]
    pub garbage_email_amount: Option<Count>,
    #[serde(rename = "mailboxUnreadUrl")]
    pub mailbox_unread_url: Option<String>,
    #[serde(rename = "appUrl")]
    pub app_url: String,
    #[serde(rename = "isMainEmail")]
    pub is_main_email: bool,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAttributes {
    #[serde(rename = "organizationId")]
    pub organization_id: String,
    #[serde(rename = "identityTypeCode")]
    pub identity_type_code: String,
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(rename = "organizationName")]
    pub organization_name: String,
    #[serde(rename = "organizationCode")]
    pub organization_code: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    #[serde(rename = "identityTypeName")]
    pub identity_type_name: String,
    #[serde(rename = "identityTypeId")]
    pub identity_type_id: String,
    #[serde(rename = "userName")]
    pub user_name: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userUid")]
    pub user_uid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub roles: Vec<String>,
    pub attributes: Option<UserAttributes>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardExpenditure {
    pub time: String,
    pub amount: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(rename = "payWay")]
    pub pay_way: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardLastCas {
    pub time: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ECard {
    #[serde(rename = "lastExpenditure", default)]
    pub last_expenditure: Loose<Vec<CardExpenditure>>,
    #[serde(rename = "lastIncome", default)]
    pub last_income: Vec<serde_json::Value>,
    pub balance: String,
    #[serde(rename = "eCardType")]
    pub card_type: String,
    #[serde(rename = "cardStatus")]
    pub card_status: String,
    #[serde(rename = "openDate")]
    pub open_date: Option<String>,
    #[serde(rename = "monthBalance")]
    pub month_balance: String,
    #[serde(rename = "appUrl")]
    pub app_url: String,
    #[serde(rename = "pcUrl")]
    pub pc_url: Option<String>,
    #[serde(rename = "lastCas")]
    pub last_cas: Option<CardLastCas>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkFlow {
    #[serde(rename = "flowMonth")]
    pub flow_month: String,
    #[serde(rename = "flowSumBytes")]
    pub flow_sum_bytes: String,
    #[serde(rename = "flowUsedBytes")]
    pub flow_used_bytes: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkFee {
    #[serde(rename = "userBalance")]
    pub user_balance: String,
    #[serde(rename = "packageName")]
    pub package_name: String,
    #[serde(rename = "pcUrl")]
    pub pc_url: String,
    #[serde(rename = "appUrl")]
    pub app_url: String,
    #[serde(rename = "packageFlow")]
    pub package_flow: String,
    #[serde(rename = "residueFlow")]
    pub residue_flow: String,
    #[serde(rename = "accountBalance")]
    pub account_balance: String,
    #[serde(rename = "residueBalance")]
    pub residue_balance: String,
    #[serde(rename = "flowList", default)]
    pub flow_list: Loose<Vec<NetworkFlow>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepayBook {
    #[serde(rename = "shouldRepayBookName")]
    pub name: String,
    #[serde(rename = "shouldRepayBookDate")]
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BorrowedBooks {
    #[serde(rename = "bookId")]
    pub book_id: Option<String>,
    #[serde(rename = "borrowCount")]
    pub borrow_count: String,
    #[serde(rename = "bookArrearage")]
    pub book_arrearage: String,
    #[serde(rename = "bookPastDue")]
    pub book_past_due: String,
    #[serde(rename = "pcUrl")]
    pub pc_url: String,
    #[serde(rename = "appUrl")]
    pub app_url: String,
    #[serde(rename = "shouldRepayList")]
    pub should_repay: Option<Vec<RepayBook>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Property {
    #[serde(rename = "propertySum")]
    pub property_sum: String,
    #[serde(rename = "propertySumUnit")]
    pub property_sum_unit: String,
    #[serde(rename = "propertyAmount")]
    pub property_amount: f64,
    #[serde(rename = "propertyAmountUnit")]
    pub property_amount_unit: String,
    #[serde(rename = "pcUrl")]
    pub pc_url: String,
    #[serde(rename = "appUrl")]
    pub app_url: String,
    /// Entry layout has not been observed yet.
    #[serde(rename = "propertyInfoList", default)]
    pub property_info_list: Loose<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsRequest {
    #[serde(rename = "startDate", serialize_with = "serialize_date_dash")]
    pub start_date: NaiveDate,
    #[serde(rename = "endDate", serialize_with = "serialize_date_dash")]
    pub end_date: NaiveDate,
    #[serde(rename = "reqType")]
    pub mode: String,
    #[serde(rename = "randomNumber")]
    pub random_number: u32,
}

impl EventsRequest {
    pub fn date_view(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        EventsRequest { start_date, end_date, mode: "DateView".to_string(), random_number: 0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarEntry {
    pub id: String,
    #[serde(rename = "calendarId")]
    pub calendar_id: Option<String>,
    pub title: String,
    #[serde(rename = "isWholeDay")]
    pub is_whole_day: String,
    #[serde(rename = "startDate")]
    pub start_date: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
    #[serde(rename = "endDate")]
    pub end_date: String,
    #[serde(rename = "endTime")]
    pub end_time: String,
    pub address: Option<String>,
    pub remark: Option<String>,
    #[serde(rename = "startDateStr")]
    pub start_date_str: String,
    #[serde(rename = "endDateStr")]
    pub end_date_str: String,
    pub timezone: String,
    pub color: String,
    #[serde(rename = "calendarName")]
    pub calendar_name: String,
    #[serde(rename = "scheduleType")]
    pub schedule_type: Option<String>,
    #[serde(rename = "remindDate")]
    pub remind_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleDay {
    #[serde(rename = "calendarList", default)]
    pub calendar_list: Loose<Vec<CalendarEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Events {
    /// Keyed by date.
    #[serde(default)]
    pub schedule: HashMap<String, ScheduleDay>,
    #[serde(rename = "reqType")]
    pub req_type: String,
}

pub struct EcampusClient<'a> {
    session: &'a Session,
    headers: HeaderMap,
    token: String,
}

impl<'a> EcampusClient<'a> {
    pub fn new(session: &'a Session, token: &str) -> Result<Self> {
        Ok(EcampusClient {
            session,
            headers: headers_with_token(session, "X-Id-Token", token)?,
            token: token.to_string(),
        })
    }

    pub async fn login(session: &'a Session) -> Result<Option<Self>> {
        match authorize_and_extract_token(session).await? {
            Some(token) => {
                info!("e-campus token acquired");
                Ok(Some(EcampusClient::new(session, &token)?))
            }
            None => Ok(None),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<EcampusResponse<T>> {
        let response = self.session.client().get(url).headers(self.headers.clone()).send().await?;
        read_json(response).await
    }

    fn portal_api(&self, path: &str) -> String {
        concat_url(&self.session.settings().services.ecampus, &format!("/portal-api/{}", path))
    }

    fn authx(&self, path: &str) -> String {
        concat_url(&self.session.settings().services.ecampus_authx, &format!("/personal/api/v1/{}", path))
    }

    pub async fn new_email(&self) -> Result<EcampusResponse<Vec<EmailSummary>>> {
        let url = concat_url(
            &self.session.settings().services.ecampus_portal,
            "/portalCenter/v2/personalData/getEmailDataNew",
        );
        self.get(url).await
    }

    pub async fn user_info(&self) -> Result<EcampusResponse<UserInfo>> {
        self.get(self.authx("personal/me/user")).await
    }

    /// Raw image bytes.
    pub async fn portrait(&self) -> Result<Vec<u8>> {
        let random_number = rand::thread_rng().gen_range(100..1000);
        let bytes = self.session.client().get(self.authx("me/portrait"))
            .headers(self.headers.clone())
            .query(&[("token", self.token.clone()), ("random_number", random_number.to_string())])
            .send().await?
            .error_for_status()?
            .bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Paper layout has not been observed yet.
    pub async fn papers(&self) -> Result<EcampusResponse<HashMap<String, serde_json::Value>>> {
        self.get(self.portal_api("v2/personalData/getPaper")).await
    }

    pub async fn ecard(&self) -> Result<EcampusResponse<ECard>> {
        self.get(self.portal_api("v2/personalData/getMyECard")).await
    }

    pub async fn network_fee(&self) -> Result<EcampusResponse<NetworkFee>> {
        self.get(self.portal_api("v2/personalData/getNetworkFeeInfo")).await
    }

    pub async fn borrowed_books(&self) -> Result<EcampusResponse<BorrowedBooks>> {
        self.get(self.portal_api("v2/personalData/getMyBooks")).await
    }

    pub async fn property(&self) -> Result<EcampusResponse<Property>> {
        self.get(self.portal_api("v2/personalData/getPropertyInfo")).await
    }

    pub async fn events(&self, request: &EventsRequest) -> Result<EcampusResponse<Events>> {
        let response = self.session.client().get(self.portal_api("v1/calendar/share/schedule/getEvents"))
            .headers(self.headers.clone())
            .query(request)
            .send().await?;
        read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path, query_param as has_query},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::settings::Settings;

    fn ticket_for(payload: serde_json::Value) -> String {
        format!("eyJhbGciOiJIUzI1NiJ9.{}.c2ln", general_purpose::STANDARD.encode(payload.to_string()))
    }

    fn session_for(cas: &MockServer, ecampus: &MockServer) -> Session {
        let mut settings = Settings { cas_url: format!("{}/cas", cas.uri()), ..Settings::default() };
        settings.services.ecampus = ecampus.uri();
        settings.services.ecampus_authx = ecampus.uri();
        Session::new(settings).unwrap()
    }

    #[test]
    fn service_url_keeps_landing_fragment_inside_path() {
        let session = Session::new(Settings::default()).unwrap();
        let login = with_service(&session.settings().cas("/login"), &service_url(&session)).unwrap();
        assert_eq!(
            login.as_str(),
            "https://uis.nwpu.edu.cn/cas/login?service=https%3A%2F%2Fecampus.nwpu.edu.cn%2F%3Fpath%3Dhttps%253A%252F%252Fecampus.nwpu.edu.cn%252Fmain.html%2523%252F"
        );

        let service = url::Url::parse(&service_url(&session)).unwrap();
        assert_eq!(service.fragment(), None);
        assert_eq!(query_param(&service, "path").as_deref(), Some("https://ecampus.nwpu.edu.cn/main.html#/"));
    }

    #[test]
    fn parse_token_reads_id_token() {
        let ticket = ticket_for(json!({ "idToken": "id-xyz", "identityTypeCode": "student" }));
        assert_eq!(parse_token(&ticket).unwrap(), "id-xyz");
    }

    #[test]
    fn parse_token_accepts_unpadded_url_safe_payload() {
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(json!({ "idToken": "a?b>c" }).to_string());
        assert_eq!(parse_token(&format!("h.{}.s", payload)).unwrap(), "a?b>c");
    }

    #[test]
    fn parse_token_rejects_missing_segment() {
        assert!(matches!(parse_token("no-dots-here"), Err(login::Error::MalformedResponse(_))));
        assert!(matches!(parse_token("header."), Err(login::Error::MalformedResponse(_))));
    }

    #[test]
    fn parse_token_rejects_payload_without_id_token() {
        let ticket = ticket_for(json!({ "organizationName": "x" }));
        assert!(matches!(parse_token(&ticket), Err(login::Error::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn authorize_reads_ticket_from_single_redirect() {
        let cas = MockServer::start().await;
        let ecampus = MockServer::start().await;
        let ticket = ticket_for(json!({ "idToken": "id-xyz" }));
        let location = format!("{}/?path=main&ticket={}", ecampus.uri(), ticket);
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", location.as_str()))
            .mount(&cas).await;

        let session = session_for(&cas, &ecampus);
        assert_eq!(authorize_and_extract_token(&session).await.unwrap().as_deref(), Some("id-xyz"));
        // the redirect itself is never followed
        assert!(ecampus.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn authorize_elsewhere_yields_none() {
        let cas = MockServer::start().await;
        let ecampus = MockServer::start().await;
        let location = format!("{}/cas/login?error=1", cas.uri());
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", location.as_str()))
            .mount(&cas).await;

        let session = session_for(&cas, &ecampus);
        assert_eq!(authorize_and_extract_token(&session).await.unwrap(), None);
    }

    #[tokio::test]
    async fn client_calls_carry_token() {
        let cas = MockServer::start().await;
        let ecampus = MockServer::start().await;
        Mock::given(method("GET")).and(path("/personal/api/v1/personal/me/user"))
            .and(header("X-Id-Token", "id-xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "acknowleged": true, "code": 0, "message": null,
                "data": { "username": "2021300000", "roles": ["student"], "attributes": null }
            })))
            .mount(&ecampus).await;
        Mock::given(method("GET")).and(path("/personal/api/v1/me/portrait"))
            .and(has_query("token", "id-xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&ecampus).await;

        let session = session_for(&cas, &ecampus);
        let client = EcampusClient::new(&session, "id-xyz").unwrap();
        let info = client.user_info().await.unwrap();
        assert_eq!(info.acknowledged, Some(true));
        assert_eq!(info.data.get().unwrap().unwrap().username, "2021300000");
        assert_eq!(client.portrait().await.unwrap(), vec![1, 2, 3]);
    }
}
