use std::collections::HashMap;

use chrono::NaiveDate;
use log::{info, warn};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::{redirect::RedirectChain, session::Session, utils::concat_url};

use super::{
    follow_cas, headers_with_token, parse_base, query_token, read_json, serialize_date_dash, ApiResponse, Loose,
    Result,
};

/// The `service=` target that makes CAS hand out a classroom token.
pub fn service_url(session: &Session) -> String {
    let base = &session.settings().services.classroom;
    format!("{}/login/cas?redirect_uri={}/ui/leisureClassroom", base, base)
}

/// Token carried by a chain that ended on the classroom host.
pub fn token_from_chain(session: &Session, chain: &RedirectChain) -> Result<Option<String>> {
    let service = parse_base(&session.settings().services.classroom)?;
    Ok(query_token(chain, &service))
}

/// Runs the CAS redirect for the classroom service on an authenticated session.
///
/// `Ok(None)` when the chain did not end on the classroom host, i.e. not logged in.
pub async fn authorize(session: &Session) -> Result<Option<String>> {
    let followed = follow_cas(session, &service_url(session)).await?;
    let token = token_from_chain(session, &followed.chain)?;
    if token.is_none() {
        warn!("classroom login did not land on the classroom host: {:?}", followed.chain.last());
    }
    Ok(token)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeachingWeek {
    #[serde(rename = "semesterName")]
    pub semester_name: String,
    #[serde(rename = "weekOfSemester")]
    pub week_of_semester: i32,
    /// Unix timestamp in ms.
    #[serde(rename = "startDay")]
    pub start_day: i64,
    /// Unix timestamp in ms.
    #[serde(rename = "endDay")]
    pub end_day: i64,
}

/// Query of `/idleclassroom/classroom`. `-2` means "any".
#[derive(Debug, Clone, Serialize)]
pub struct IdleListRequest {
    pub building: String,
    pub campus: String,
    #[serde(rename = "weekOfSemester")]
    pub week_of_semester: i32,
    #[serde(rename = "startDateOfWeek", serialize_with = "serialize_date_dash")]
    pub start_date_of_week: NaiveDate,
    #[serde(rename = "endDateOfWeek", serialize_with = "serialize_date_dash")]
    pub end_date_of_week: NaiveDate,
    #[serde(rename = "roomType")]
    pub room_type: i32,
    #[serde(rename = "seatCode")]
    pub seat_code: i32,
    #[serde(rename = "startUnit", skip_serializing_if = "Option::is_none")]
    pub start_unit: Option<i32>,
    #[serde(rename = "endUnit", skip_serializing_if = "Option::is_none")]
    pub end_unit: Option<i32>,
}

impl IdleListRequest {
    pub fn new(week_of_semester: i32, start_date_of_week: NaiveDate, end_date_of_week: NaiveDate) -> Self {
        IdleListRequest {
            building: "-2".to_string(),
            campus: "-2".to_string(),
            week_of_semester,
            start_date_of_week,
            end_date_of_week,
            room_type: -2,
            seat_code: -2,
            start_unit: None,
            end_unit: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdleRoom {
    #[serde(rename = "classroomName")]
    pub classroom_name: String,
    #[serde(rename = "unitList")]
    pub unit_list: Vec<String>,
    #[serde(rename = "isIdle")]
    pub is_idle: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdleList {
    /// Weekday ("1".."7") to rooms.
    #[serde(rename = "countMap")]
    pub count_map: HashMap<String, Loose<Vec<IdleRoom>>>,
    /// Weekday to timestamp in ms.
    #[serde(rename = "dateMap")]
    pub date_map: HashMap<String, serde_json::Value>,
    #[serde(rename = "unitsList")]
    pub units_list: Vec<i32>,
}

/// Query of `/idleclassroom/table`.
#[derive(Debug, Clone, Serialize)]
pub struct CountByTimeRequest {
    pub building: String,
    pub campus: String,
    #[serde(rename = "weekOfSemester")]
    pub week_of_semester: i32,
    #[serde(rename = "startDateOfWeek", serialize_with = "serialize_date_dash")]
    pub start_date_of_week: NaiveDate,
    #[serde(rename = "endDateOfWeek", serialize_with = "serialize_date_dash")]
    pub end_date_of_week: NaiveDate,
    #[serde(rename = "startUnit", skip_serializing_if = "Option::is_none")]
    pub start_unit: Option<i32>,
    #[serde(rename = "endUnit", skip_serializing_if = "Option::is_none")]
    pub end_unit: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitCount {
    pub unit: String,
    pub num: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountByTime {
    #[serde(rename = "countMap")]
    pub count_map: HashMap<String, Loose<Vec<UnitCount>>>,
    #[serde(rename = "dateMap")]
    pub date_map: Loose<HashMap<String, i64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DictItem {
    pub id: String,
    #[serde(rename = "parentId")]
    pub parent_id: String,
    #[serde(rename = "topId")]
    pub top_id: String,
    pub code: String,
    pub name: String,
    #[serde(rename = "engName")]
    pub eng_name: String,
    pub sort: i32,
    pub remark: String,
    #[serde(rename = "isDeleted")]
    pub is_deleted: i32,
}

/// Query of `/idleclassroom/detail`.
#[derive(Debug, Clone, Serialize)]
pub struct DetailRequest {
    pub building: String,
    pub campus: String,
    pub classroom: String,
    #[serde(rename = "weekOfSemester")]
    pub week_of_semester: i32,
    pub weekday: i32,
    #[serde(rename = "startDateOfWeek", serialize_with = "serialize_date_dash")]
    pub start_date_of_week: NaiveDate,
    #[serde(rename = "endDateOfWeek", serialize_with = "serialize_date_dash")]
    pub end_date_of_week: NaiveDate,
    #[serde(rename = "roomType")]
    pub room_type: i32,
    #[serde(rename = "seatCode")]
    pub seat_code: i32,
    #[serde(rename = "startUnit")]
    pub start_unit: i32,
    #[serde(rename = "endUnit")]
    pub end_unit: i32,
    #[serde(rename = "current")]
    pub page: i32,
    #[serde(rename = "size")]
    pub page_size: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailRecord {
    pub id: String,
    pub campus: String,
    pub building: String,
    pub classroom: String,
    #[serde(rename = "classroomCode")]
    pub classroom_code: String,
    #[serde(rename = "roomType")]
    pub room_type: String,
    pub seat: String,
    pub weeks: serde_json::Value,
    pub units: serde_json::Value,
    pub weekday: serde_json::Value,
    #[serde(rename = "roomKey")]
    pub room_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailPage {
    #[serde(default)]
    pub records: Loose<Vec<DetailRecord>>,
    pub total: i64,
    pub size: i64,
    pub current: i64,
    pub pages: i64,
}

pub struct ClassroomClient<'a> {
    session: &'a Session,
    headers: HeaderMap,
}

impl<'a> ClassroomClient<'a> {
    pub fn new(session: &'a Session, token: &str) -> Result<Self> {
        Ok(ClassroomClient { session, headers: headers_with_token(session, "X-Id-Token", token)? })
    }

    /// Logs into the classroom service with the session's CAS login.
    pub async fn login(session: &'a Session) -> Result<Option<Self>> {
        match authorize(session).await? {
            Some(token) => {
                info!("classroom token acquired");
                Ok(Some(ClassroomClient::new(session, &token)?))
            }
            None => Ok(None),
        }
    }

    fn api(&self, path: &str) -> String {
        concat_url(&self.session.settings().services.classroom, &format!("/api/{}", path))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        let response = self.session.client().get(self.api(path)).headers(self.headers.clone()).send().await?;
        read_json(response).await
    }

    async fn get_with<T: serde::de::DeserializeOwned, Q: Serialize>(&self, path: &str, query: &Q) -> Result<ApiResponse<T>> {
        let response = self.session.client().get(self.api(path))
            .headers(self.headers.clone())
            .query(query)
            .send().await?;
        read_json(response).await
    }

    /// Campus names.
    pub async fn campuses(&self) -> Result<ApiResponse<Vec<String>>> {
        self.get("idleclassroom/campus").await
    }

    /// Teaching building names of `campus`.
    pub async fn buildings(&self, campus: &str) -> Result<ApiResponse<Vec<String>>> {
        self.get(&format!("idleclassroom/building/{}", campus)).await
    }

    pub async fn teaching_weeks(&self, campus: &str) -> Result<ApiResponse<Vec<TeachingWeek>>> {
        self.get(&format!("idleclassroom/week/{}", campus)).await
    }

    pub async fn room_types(&self, campus: &str) -> Result<ApiResponse<Vec<String>>> {
        self.get(&format!("idleclassroom/roomtype/{}", campus)).await
    }

    pub async fn seat_codes(&self) -> Result<ApiResponse<Vec<DictItem>>> {
        self.get("base/dict/children/room_type").await
    }

    /// Every classroom with its idle units attached.
    pub async fn idle_list(&self, request: &IdleListRequest) -> Result<ApiResponse<IdleList>> {
        self.get_with("idleclassroom/classroom", request).await
    }

    /// Number of idle rooms per unit, without room details.
    pub async fn count_by_time(&self, request: &CountByTimeRequest) -> Result<ApiResponse<CountByTime>> {
        self.get_with("idleclassroom/table", request).await
    }

    pub async fn detail(&self, request: &DetailRequest) -> Result<ApiResponse<DetailPage>> {
        self.get_with("idleclassroom/detail", request).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{login::{OaLogin, QrLoginForm}, settings::Settings};

    async fn session_for(cas: &MockServer, classroom: &MockServer) -> Session {
        let mut settings = Settings { cas_url: format!("{}/cas", cas.uri()), ..Settings::default() };
        settings.services.classroom = classroom.uri();
        Session::new(settings).unwrap()
    }

    #[test]
    fn token_from_literal_chain() {
        let session = Session::new(Settings::default()).unwrap();
        let chain = RedirectChain::from(vec![Url::parse(
            "https://idle-classroom.nwpu.edu.cn/login/cas?redirect_uri=https://idle-classroom.nwpu.edu.cn/ui/leisureClassroom&token=abc123",
        )
        .unwrap()]);
        assert_eq!(token_from_chain(&session, &chain).unwrap().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn login_completion_chain_yields_classroom_token() {
        let cas = MockServer::start().await;
        let classroom = MockServer::start().await;
        let landing = format!("{}/login/cas?redirect_uri={}/ui/leisureClassroom&token=abc123", classroom.uri(), classroom.uri());
        Mock::given(method("POST")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", landing.as_str()))
            .mount(&cas).await;
        Mock::given(method("POST")).and(path("/login/cas"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&classroom).await;

        let session = session_for(&cas, &classroom).await;
        let chain = OaLogin::new(&session).complete(&service_url(&session), QrLoginForm::new("k")).await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(token_from_chain(&session, &chain).unwrap().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn authorize_without_landing_yields_none() {
        let cas = MockServer::start().await;
        let classroom = MockServer::start().await;
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login page</html>"))
            .mount(&cas).await;

        let session = session_for(&cas, &classroom).await;
        assert_eq!(authorize(&session).await.unwrap(), None);
    }

    #[tokio::test]
    async fn client_sends_token_and_parses_envelope() {
        let cas = MockServer::start().await;
        let classroom = MockServer::start().await;
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/login/cas?token=tk", classroom.uri()).as_str()))
            .mount(&cas).await;
        Mock::given(method("GET")).and(path("/login/cas"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&classroom).await;
        Mock::given(method("GET")).and(path("/api/idleclassroom/campus"))
            .and(header("X-Id-Token", "tk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "code": 200, "msg": "ok", "data": ["友谊校区", "长安校区"]
            })))
            .mount(&classroom).await;
        Mock::given(method("GET")).and(path("/api/idleclassroom/classroom"))
            .and(query_param("startDateOfWeek", "2024-09-02"))
            .and(query_param("weekOfSemester", "1"))
            .and(query_param("campus", "-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": {
                    "countMap": { "1": [{ "classroomName": "教东A101", "unitList": ["1", "2"], "isIdle": true }] },
                    "dateMap": { "1": 1725206400000i64 },
                    "unitsList": [1, 2, 3]
                }
            })))
            .mount(&classroom).await;

        let session = session_for(&cas, &classroom).await;
        let client = ClassroomClient::login(&session).await.unwrap().unwrap();
        assert_eq!(client.campuses().await.unwrap().into_data().unwrap(), vec!["友谊校区", "长安校区"]);

        let request = IdleListRequest::new(
            1,
            NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 9, 8).unwrap(),
        );
        let list = client.idle_list(&request).await.unwrap().into_data().unwrap();
        let rooms = list.count_map["1"].get().unwrap().unwrap();
        assert_eq!(rooms[0].classroom_name, "教东A101");
        assert!(rooms[0].is_idle);
    }
}
