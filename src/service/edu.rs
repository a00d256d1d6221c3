use log::{info, warn};
use reqwest::header::HeaderMap;
use serde::Deserialize;

use crate::{redirect::RedirectChain, session::Session, utils::concat_url};

use super::{follow_cas, parse_base, read_json, Loose, Result};

pub fn service_url(session: &Session) -> String {
    concat_url(&session.settings().services.edu, "/student/sso-login")
}

/// Follows the CAS redirect for the teaching-affairs system; its cookies end up in the jar.
///
/// `Ok(None)` when the chain did not end on the edu host.
pub async fn authorize(session: &Session) -> Result<Option<RedirectChain>> {
    let followed = follow_cas(session, &service_url(session)).await?;
    let service = parse_base(&session.settings().services.edu)?;
    if followed.chain.landed_on(&service).is_none() {
        warn!("edu login did not land on the edu host: {:?}", followed.chain.last());
        return Ok(None);
    }
    Ok(Some(followed.chain))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub id: i64,
    #[serde(rename = "personAssoc")]
    pub person_assoc: i64,
    pub item: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(rename = "permCode")]
    pub perm_code: String,
    #[serde(rename = "createDateTime")]
    pub create_date_time: String,
    pub read: bool,
    #[serde(rename = "infoUrl")]
    pub info_url: String,
    pub alert: bool,
    pub effective: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPage {
    #[serde(rename = "currentPage")]
    pub current_page: i64,
    #[serde(rename = "rowsInPage")]
    pub rows_in_page: i64,
    #[serde(rename = "rowsPerPage")]
    pub rows_per_page: i64,
    #[serde(rename = "totalRows")]
    pub total_rows: i64,
    #[serde(rename = "totalPages")]
    pub total_pages: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationCount {
    #[serde(rename = "notificationCount")]
    pub total: i64,
    #[serde(rename = "noReadCount")]
    pub unread: i64,
    #[serde(rename = "readCount")]
    pub read: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSort {
    pub field: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "typeString")]
    pub type_string: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Notifications {
    #[serde(rename = "parentrUrl")]
    pub parent_url: String,
    #[serde(rename = "studentUrl")]
    pub student_url: String,
    #[serde(rename = "teacherUrl")]
    pub teacher_url: String,
    #[serde(rename = "managerUrl")]
    pub manager_url: String,
    #[serde(default)]
    pub data: Loose<Vec<Notification>>,
    #[serde(rename = "_page_")]
    pub page: NotificationPage,
    #[serde(rename = "notificationCount")]
    pub count: NotificationCount,
    #[serde(rename = "_sorts_", default)]
    pub sorts: Vec<NotificationSort>,
}

pub struct EduClient<'a> {
    session: &'a Session,
    headers: HeaderMap,
}

impl<'a> EduClient<'a> {
    /// The edu system authenticates by cookie, so `authorize` must have run on `session`.
    pub fn new(session: &'a Session) -> Self {
        EduClient { session, headers: session.headers() }
    }

    pub async fn login(session: &'a Session) -> Result<Option<Self>> {
        match authorize(session).await? {
            Some(chain) => {
                info!("edu authorized after {} redirect(s)", chain.len());
                Ok(Some(EduClient::new(session)))
            }
            None => Ok(None),
        }
    }

    pub async fn notifications(&self) -> Result<Notifications> {
        let url = concat_url(&self.session.settings().services.edu, "/student/my-notification/get-notifications");
        let response = self.session.client().get(url).headers(self.headers.clone()).send().await?;
        read_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::settings::Settings;

    #[tokio::test]
    async fn login_then_notifications() {
        let cas = MockServer::start().await;
        let edu = MockServer::start().await;
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/student/sso-login?ticket=ST-1", edu.uri()).as_str()))
            .mount(&cas).await;
        Mock::given(method("GET")).and(path("/student/sso-login"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/student/home"))
            .mount(&edu).await;
        Mock::given(method("GET")).and(path("/student/home"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&edu).await;
        Mock::given(method("GET")).and(path("/student/my-notification/get-notifications"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "parentrUrl": "", "studentUrl": "/student", "teacherUrl": "", "managerUrl": "",
                "data": [{
                    "id": 7, "personAssoc": 1, "item": "选课", "type": "NOTICE", "content": "选课开始",
                    "permCode": "", "createDateTime": "2024-09-01 08:00:00", "read": false, "infoUrl": "",
                    "alert": true, "effective": true
                }],
                "_page_": { "currentPage": 1, "rowsInPage": 1, "rowsPerPage": 20, "totalRows": 1, "totalPages": 1 },
                "notificationCount": { "notificationCount": 1, "noReadCount": 1, "readCount": 0 },
                "_sorts_": []
            })))
            .mount(&edu).await;

        let mut settings = Settings { cas_url: format!("{}/cas", cas.uri()), ..Settings::default() };
        settings.services.edu = edu.uri();
        let session = Session::new(settings).unwrap();

        let chain = authorize(&session).await.unwrap().unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.last().unwrap().path().ends_with("/student/home"));

        let notifications = EduClient::new(&session).notifications().await.unwrap();
        assert_eq!(notifications.count.unread, 1);
        assert_eq!(notifications.data.get().unwrap().unwrap()[0].item, "选课");
    }

    #[tokio::test]
    async fn cas_redirect_elsewhere_is_not_a_login() {
        let cas = MockServer::start().await;
        let edu = MockServer::start().await;
        Mock::given(method("GET")).and(path("/cas/login"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/cas/login-page"))
            .mount(&cas).await;
        Mock::given(method("GET")).and(path("/cas/login-page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<form id=\"fm1\"></form>"))
            .mount(&cas).await;

        let mut settings = Settings { cas_url: format!("{}/cas", cas.uri()), ..Settings::default() };
        settings.services.edu = edu.uri();
        let session = Session::new(settings).unwrap();

        assert!(EduClient::login(&session).await.unwrap().is_none());
        assert!(edu.received_requests().await.unwrap().is_empty());
    }
}
