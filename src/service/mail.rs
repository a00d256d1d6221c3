use log::{debug, info, warn};
use reqwest::{header::HeaderMap, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use crate::{
    redirect::next_hop,
    session::Session,
    utils::{concat_url, query_param, timestamp_mill},
};

use super::{read_json, Loose, Result};

pub const SID_COOKIE: &str = "Coremail.sid";

fn bridge_url(session: &Session) -> String {
    concat_url(&session.settings().services.mail, "/cmcuapi/sso/oauth2")
}

/// Walks the two redirects of the mail OAuth bridge by hand and returns the `service=` target
/// that the CAS login has to be run for.
///
/// `Ok(None)` when the bridge does not answer with the expected redirect.
pub async fn oa_redirect(session: &Session) -> Result<Option<String>> {
    let response = session.get_once(Url::parse(&bridge_url(session))?).await?;
    let Some(hop) = next_hop(&response) else {
        warn!("mail bridge answered {} instead of a redirect", response.status());
        return Ok(None);
    };
    let response = session.get_once(hop).await?;
    let Some(login) = next_hop(&response) else {
        warn!("mail bridge stopped after one redirect: {}", response.url());
        return Ok(None);
    };
    debug!("mail login url: {}", login);
    Ok(query_param(&login, "service"))
}

/// `Coremail.sid` cookie set by the mail host after a successful login.
pub fn extract_sid(session: &Session) -> Result<Option<String>> {
    let url = Url::parse(&concat_url(&session.settings().services.mail, "/coremail/"))?;
    Ok(session.cookie(&url, SID_COOKIE))
}

/// Runs the bridge with redirects followed on an authenticated session and reads the SID.
pub async fn authorize(session: &Session) -> Result<Option<String>> {
    let followed = session.get_following(Url::parse(&bridge_url(session))?).await?;
    debug!("mail bridge finished after {} redirect(s)", followed.chain.len());
    let sid = extract_sid(session)?;
    if sid.is_none() {
        warn!("mail host did not set {}", SID_COOKIE);
    }
    Ok(sid)
}

/// Coremail answers `{code, var}` with `code == "S_OK"` on success, served as `text/x-json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound = "")]
pub struct CoremailResponse<T> {
    pub code: String,
    #[serde(default)]
    pub var: Loose<T>,
    #[serde(rename = "errorMsg")]
    pub error_msg: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
}

impl<T> CoremailResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.code == "S_OK"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FoldersRequest {
    pub stats: bool,
    pub threads: bool,
}

impl Default for FoldersRequest {
    fn default() -> Self {
        FoldersRequest { stats: true, threads: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderFlags {
    pub system: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderStats {
    #[serde(rename = "messageCount")]
    pub message_count: i64,
    #[serde(rename = "unreadMessageCount")]
    pub unread_message_count: i64,
    #[serde(rename = "messageSize", default)]
    pub message_size: i64,
    #[serde(rename = "unreadMessageSize", default)]
    pub unread_message_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub flags: FolderFlags,
    #[serde(rename = "keepPeriod", default)]
    pub keep_period: i64,
    pub stats: FolderStats,
}

pub const FOLDER_INBOX: i64 = 1;
pub const FOLDER_DRAFT: i64 = 2;
pub const FOLDER_SENT: i64 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct ListMessagesRequest {
    pub start: u32,
    pub limit: u32,
    pub mode: String,
    /// `receivedDate`, `from`, `subject` or `size`.
    pub order: String,
    pub desc: bool,
    #[serde(rename = "returnTotal")]
    pub return_total: bool,
    #[serde(rename = "summaryWindowSize")]
    pub summary_window_size: u32,
    #[serde(rename = "skipLockedFolders")]
    pub skip_locked_folders: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fids: Option<Vec<i64>>,
    pub mboxa: String,
    #[serde(rename = "topFirst")]
    pub top_first: bool,
    pub filter: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "filterFlags")]
    pub filter_flags: serde_json::Map<String, serde_json::Value>,
}

impl Default for ListMessagesRequest {
    fn default() -> Self {
        ListMessagesRequest {
            start: 0,
            limit: 20,
            mode: "count".to_string(),
            order: "receivedDate".to_string(),
            desc: true,
            return_total: true,
            summary_window_size: 20,
            skip_locked_folders: false,
            fid: Some(FOLDER_INBOX),
            fids: None,
            mboxa: String::new(),
            top_first: true,
            filter: serde_json::Map::new(),
            filter_flags: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageFlags {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub archived: bool,
    pub attached: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub fid: i64,
    pub size: i64,
    pub from: String,
    pub to: String,
    pub subject: String,
    #[serde(rename = "sentDate")]
    pub sent_date: String,
    #[serde(rename = "receivedDate")]
    pub received_date: String,
    #[serde(rename = "modifiedDate")]
    pub modified_date: String,
    pub priority: i64,
    #[serde(rename = "backgroundColor")]
    pub background_color: i64,
    #[serde(rename = "antiVirusStatus")]
    pub anti_virus_status: String,
    pub label0: i64,
    #[serde(default)]
    pub flags: MessageFlags,
    pub hmid: String,
    pub sender: String,
    pub summary: Option<String>,
}

/// `mbox:listMessages` puts paging fields next to `code`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageList {
    pub code: String,
    #[serde(rename = "midoffset")]
    pub mid_offset: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub var: Loose<Vec<MessageSummary>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadMessageRequest {
    pub mid: String,
    pub mboxa: String,
    pub part: String,
    #[serde(rename = "mailCipherPassword")]
    pub mail_cipher_password: String,
}

impl ReadMessageRequest {
    pub fn new(mid: &str) -> Self {
        ReadMessageRequest { mid: mid.to_string(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "contentLength")]
    pub content_length: i64,
    pub encoding: String,
    #[serde(rename = "contentOffset")]
    pub content_offset: i64,
    #[serde(rename = "estimateSize")]
    pub estimate_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainPart {
    pub extended: bool,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub from: Vec<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(rename = "requestReadReceipt", default)]
    pub request_read_receipt: bool,
    #[serde(rename = "isManualDisposition", default)]
    pub is_manual_disposition: bool,
    pub subject: String,
    /// Raw mail headers such as `From` and `Content-Type`.
    #[serde(default)]
    pub headers: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(rename = "inlineAttachments", default)]
    pub inline_attachments: Vec<Attachment>,
    #[serde(rename = "mainPartData")]
    pub main_part: MainPart,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadMessage {
    pub mail: Message,
    #[serde(rename = "mailInfo")]
    pub info: MessageSummary,
    #[serde(rename = "mailCipherEncrypted", default)]
    pub mail_cipher_encrypted: bool,
    #[serde(rename = "smimePkcs7Enveloped", default)]
    pub smime_pkcs7_enveloped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchContactsRequest {
    #[serde(rename = "groupid")]
    pub group_id: String,
    pub reload: bool,
    pub limit: u32,
}

impl Default for SearchContactsRequest {
    fn default() -> Self {
        SearchContactsRequest { group_id: String::new(), reload: true, limit: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    #[serde(rename = "EMAIL;PREF")]
    pub email: String,
    #[serde(rename = "FN")]
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub id: String,
    pub rev: i64,
}

/// `pab:search` answers with the contacts next to `code` instead of under `var`.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactSearch {
    pub code: String,
    #[serde(rename = "grpName", default)]
    pub group_name: serde_json::Value,
    #[serde(default)]
    pub list: Vec<Contact>,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactGroup {
    pub id: String,
    pub name: String,
    pub members: Vec<serde_json::Value>,
    pub reserved: bool,
    pub rev: i64,
}

pub struct MailClient<'a> {
    session: &'a Session,
    headers: HeaderMap,
    sid: String,
}

impl<'a> MailClient<'a> {
    pub fn new(session: &'a Session, sid: &str) -> Self {
        MailClient { session, headers: session.headers(), sid: sid.to_string() }
    }

    pub async fn login(session: &'a Session) -> Result<Option<Self>> {
        match authorize(session).await? {
            Some(sid) => {
                info!("mail session established");
                Ok(Some(MailClient::new(session, &sid)))
            }
            None => Ok(None),
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    fn request(&self, path: &str) -> RequestBuilder {
        let url = concat_url(&self.session.settings().services.mail, path);
        self.session.client().post(url)
            .headers(self.headers.clone())
            .query(&[("sid", self.sid.as_str())])
    }

    fn post(&self, path: &str, func: &str) -> RequestBuilder {
        self.request(path).query(&[("func", func)])
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        read_json(request.send().await?).await
    }

    pub async fn folders(&self, request: &FoldersRequest) -> Result<CoremailResponse<Vec<Folder>>> {
        Self::send(self.post("/coremail/XT5/jsp/mail.jsp", "getAllFolders").form(request)).await
    }

    pub async fn list_messages(&self, request: &ListMessagesRequest) -> Result<MessageList> {
        Self::send(self.post("/coremail/s/json", "mbox:listMessages").json(request)).await
    }

    /// The message fields go both in the query and in the form body.
    pub async fn read_message(&self, request: &ReadMessageRequest) -> Result<CoremailResponse<ReadMessage>> {
        Self::send(self.request("/coremail/XT5/jsp/readMessage.jsp").query(request).form(request)).await
    }

    /// Raw image bytes of the account's avatar.
    pub async fn avatar(&self) -> Result<Vec<u8>> {
        let response = self.post("/coremail/s/json", "user:AgetHeadImageData")
            .query(&[("ts", timestamp_mill())])
            .json(&serde_json::json!({}))
            .send().await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn contact_groups(&self) -> Result<CoremailResponse<Vec<ContactGroup>>> {
        Self::send(self.post("/coremail/s/json", "pab:getAllGroups")).await
    }

    pub async fn search_contacts(&self, request: &SearchContactsRequest) -> Result<ContactSearch> {
        Self::send(self.post("/coremail/XT5/jsp/contact.jsp", "pab:search").form(request)).await
    }
}
