use base64::{engine::general_purpose, Engine as _};
use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::header::HeaderMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{redirect::RedirectChain, session::Session, utils::concat_url};

use super::{follow_cas, parse_base, read_json, serialize_date_slash, Loose, Result};

pub const STATUS_NEEDS_VERIFICATION: &str = "待核验";
pub const ROUTE_TYPE_COMMUTING: &str = "通勤车";

/// The `service=` target of the bus booking app. Its `targetUrl` is the h5 home page,
/// base64-encoded and prefixed with `base64`.
pub fn service_url(session: &Session) -> String {
    let base = &session.settings().services.bus;
    let home = format!("{}/h5/#/schoolBusBookingHome", base);
    format!("{}/bs/?targetUrl=base64{}", base, general_purpose::STANDARD.encode(home))
}

/// Follows the CAS redirect and re-opens the final url so the bus host sets its own cookies.
///
/// `Ok(None)` when the chain did not end on the bus host, i.e. not logged in.
pub async fn authorize(session: &Session) -> Result<Option<RedirectChain>> {
    let followed = follow_cas(session, &service_url(session)).await?;
    let service = parse_base(&session.settings().services.bus)?;
    let Some(last) = followed.chain.landed_on(&service).cloned() else {
        warn!("bus login did not land on the bus host: {:?}", followed.chain.last());
        return Ok(None);
    };
    debug!("re-opening bus landing page {}", last);
    session.client().get(last).send().await?.error_for_status()?;
    Ok(Some(followed.chain))
}

/// `{isSuccess, data, IsOpenDialog}` envelope of the bus api.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound = "")]
pub struct BusResponse<T> {
    #[serde(rename = "isSuccess")]
    pub is_success: bool,
    #[serde(default)]
    pub data: Loose<T>,
    #[serde(rename = "IsOpenDialog", default)]
    pub is_open_dialog: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentsRequest {
    #[serde(rename = "YYRGH")]
    pub student_id: String,
    #[serde(rename = "YYZT")]
    pub status: String,
    #[serde(rename = "no")]
    pub user_number: String,
}

impl AppointmentsRequest {
    pub fn new(student_id: &str) -> Self {
        AppointmentsRequest {
            student_id: student_id.to_string(),
            status: STATUS_NEEDS_VERIFICATION.to_string(),
            user_number: student_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Appointments {
    /// Record layout has not been observed yet.
    #[serde(rename = "list", default)]
    pub records: Loose<Vec<serde_json::Value>>,
    #[serde(rename = "isNeedServerTime", default)]
    pub is_need_server_time: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutesRequest {
    #[serde(rename = "type")]
    pub route_type: String,
    #[serde(rename = "no")]
    pub student_id: String,
}

impl RoutesRequest {
    pub fn new(student_id: &str) -> Self {
        RoutesRequest { route_type: ROUTE_TYPE_COMMUTING.to_string(), student_id: student_id.to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Route {
    #[serde(rename = "Objid")]
    pub id: String,
    #[serde(rename = "Type")]
    pub route_type: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "StartStation")]
    pub start_station: String,
    #[serde(rename = "EndStation")]
    pub end_station: String,
    #[serde(rename = "StudentCharge")]
    pub student_charge: String,
    #[serde(rename = "TeacherStaffCharge")]
    pub teacher_staff_charge: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationDays {
    #[serde(rename = "YYWYXZTS")]
    pub yywyxzts: String,
    #[serde(rename = "TQYYXZTS")]
    pub reserve_in_advance: String,
    #[serde(rename = "JCTQYYXZTS")]
    pub jctqyyxzts: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Routes {
    #[serde(rename = "filteredBusRoutes")]
    pub routes: Vec<Route>,
    #[serde(rename = "reservationDays")]
    pub reservation_days: ReservationDays,
    #[serde(rename = "isNeedServerTime", default)]
    pub is_need_server_time: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteDetailRequest {
    #[serde(rename = "rq", serialize_with = "serialize_date_slash")]
    pub date: NaiveDate,
    #[serde(rename = "xllx")]
    pub route_type: String,
    /// `Route::id`.
    #[serde(rename = "xlId")]
    pub route_id: String,
    #[serde(rename = "gh")]
    pub student_id: String,
    #[serde(rename = "no")]
    pub student_no: String,
}

impl RouteDetailRequest {
    pub fn new(date: NaiveDate, route_id: &str, student_id: &str) -> Self {
        RouteDetailRequest {
            date,
            route_type: ROUTE_TYPE_COMMUTING.to_string(),
            route_id: route_id.to_string(),
            student_id: student_id.to_string(),
            student_no: student_id.to_string(),
        }
    }
}

/// One departure. Field names are pinyin initials on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteDetail {
    #[serde(rename = "objId")]
    pub id: String,
    #[serde(rename = "fcsj")]
    pub departure_time: String,
    #[serde(rename = "yyrs")]
    pub reserved_seats: i32,
    #[serde(rename = "kyyrs")]
    pub available_seats: String,
    #[serde(rename = "tsxx")]
    pub notice_message: String,
    #[serde(rename = "yyjzxx")]
    pub reservation_due_message: String,
    #[serde(rename = "sfkyy")]
    pub is_reservable: bool,
    #[serde(rename = "xshyrs")]
    pub verified_student_count: i32,
    #[serde(rename = "jshyrs")]
    pub verified_teacher_count: i32,
    #[serde(rename = "zhyrs")]
    pub verified_count: i32,
    #[serde(rename = "bcms")]
    pub route_description: String,
}

pub struct BusClient<'a> {
    session: &'a Session,
    headers: HeaderMap,
}

impl<'a> BusClient<'a> {
    /// The bus api authenticates by cookie, so `authorize` must have run on `session`.
    pub fn new(session: &'a Session) -> Self {
        BusClient { session, headers: session.headers() }
    }

    pub async fn login(session: &'a Session) -> Result<Option<Self>> {
        match authorize(session).await? {
            Some(chain) => {
                info!("bus authorized after {} redirect(s)", chain.len());
                Ok(Some(BusClient::new(session)))
            }
            None => Ok(None),
        }
    }

    async fn post<T: DeserializeOwned, F: Serialize>(&self, path: &str, form: &F) -> Result<BusResponse<T>> {
        let url = concat_url(&self.session.settings().services.bus, path);
        let response = self.session.client().post(url).headers(self.headers.clone()).form(form).send().await?;
        read_json(response).await
    }

    pub async fn appointments(&self, request: &AppointmentsRequest) -> Result<BusResponse<Appointments>> {
        self.post("/api/GetMyAppointment", request).await
    }

    pub async fn routes(&self, request: &RoutesRequest) -> Result<BusResponse<Routes>> {
        self.post("/api/GetRouteByType", request).await
    }

    pub async fn route_details(&self, request: &RouteDetailRequest) -> Result<BusResponse<Vec<RouteDetail>>> {
        self.post("/api/GetReserveInfoList", request).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::settings::Settings;

    fn session_for(cas: &MockServer, bus: &MockServer) -> Session {
        let mut settings = Settings { cas_url: format!("{}/cas", cas.uri()), ..Settings::default() };
        settings.services.bus = bus.uri();
        Session::new(settings).unwrap()
    }

    #[test]
    fn service_url_embeds_base64_home() {
        let session = Session::new(Settings::default()).unwrap();
        assert_eq!(
            service_url(&session),
            "https://hq-bus.nwpu.edu.cn/bs/?targetUrl=base64aHR0cHM6Ly9ocS1idXMubndwdS5lZHUuY24vaDUvIy9zY2hvb2xCdXNCb29raW5nSG9tZQ=="
        );
    }

    #[tokio::test]
    async fn authorize_reopens_landing_page() {
        let cas = MockServer::start().await;
        let bus = MockServer::start().await;
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", format!("{}/bs/?ticket=ST-1", bus.uri()).as_str()))
            .mount(&cas).await;
        Mock::given(method("GET")).and(path("/bs/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&bus).await;

        let session = session_for(&cas, &bus);
        let chain = authorize(&session).await.unwrap().unwrap();
        assert_eq!(chain.len(), 1);
        let hits = bus.received_requests().await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn login_page_on_cas_means_not_logged_in() {
        let cas = MockServer::start().await;
        let bus = MockServer::start().await;
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<form id=\"fm1\"></form>"))
            .mount(&cas).await;

        let session = session_for(&cas, &bus);
        assert!(BusClient::login(&session).await.unwrap().is_none());
        assert!(bus.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn route_details_post_slash_date_form() {
        let cas = MockServer::start().await;
        let bus = MockServer::start().await;
        Mock::given(method("POST")).and(path("/api/GetReserveInfoList"))
            .and(body_string_contains("rq=2024%2F09%2F02"))
            .and(body_string_contains("xlId=r-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isSuccess": true,
                "IsOpenDialog": false,
                "data": [{
                    "objId": "d-1", "fcsj": "07:30", "yyrs": 12, "kyyrs": "33", "tsxx": "", "yyjzxx": "",
                    "sfkyy": true, "xshyrs": 3, "jshyrs": 1, "zhyrs": 4, "bcms": "友谊→长安"
                }]
            })))
            .mount(&bus).await;

        let session = session_for(&cas, &bus);
        let client = BusClient::new(&session);
        let request = RouteDetailRequest::new(NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(), "r-1", "2021300000");
        let response = client.route_details(&request).await.unwrap();
        assert!(response.is_success);
        let details = response.data.get().unwrap().unwrap();
        assert_eq!(details[0].departure_time, "07:30");
        assert_eq!(details[0].verified_count, 4);
    }
}
