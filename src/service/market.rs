use log::{info, warn};
use reqwest::header::HeaderMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{session::Session, utils::concat_url};

use super::{follow_cas, headers_with_token, parse_base, query_token, read_json, ApiResponse, Loose, Result};

pub fn service_url(session: &Session) -> String {
    let base = &session.settings().services.market;
    format!("{}/login/cas?redirect_uri={}/ui/", base, base)
}

/// `Ok(None)` when the chain did not end on the market host.
pub async fn authorize(session: &Session) -> Result<Option<String>> {
    let followed = follow_cas(session, &service_url(session)).await?;
    let market = parse_base(&session.settings().services.market)?;
    let token = query_token(&followed.chain, &market);
    if token.is_none() {
        warn!("market login did not land on the market host: {:?}", followed.chain.last());
    }
    Ok(token)
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelfInfo {
    pub id: String,
    #[serde(rename = "accountName")]
    pub account_name: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "organizationName")]
    pub organization_name: String,
}

/// Node of the dictionary trees (classification, complaint types, campus).
#[derive(Debug, Clone, Deserialize)]
pub struct DictNode {
    pub id: String,
    #[serde(rename = "parentId")]
    pub parent_id: String,
    #[serde(rename = "topId")]
    pub top_id: String,
    pub code: String,
    pub name: String,
    /// Value expected by `ItemListRequest::campus`.
    #[serde(rename = "engName")]
    pub eng_name: String,
    pub sort: i32,
    pub remark: String,
    #[serde(rename = "isDeleted")]
    pub is_deleted: i32,
    #[serde(rename = "parentCode")]
    pub parent_code: Option<String>,
    #[serde(rename = "parentName")]
    pub parent_name: Option<String>,
    #[serde(rename = "parentEngName")]
    pub parent_eng_name: Option<String>,
    #[serde(default)]
    pub children: Loose<Vec<DictNode>>,
}

/// MyBatis-Plus style page.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound = "")]
pub struct Page<T> {
    #[serde(default)]
    pub records: Loose<Vec<T>>,
    pub total: i64,
    pub size: i64,
    pub current: i64,
    pub pages: i64,
    #[serde(default)]
    pub orders: Vec<serde_json::Value>,
    #[serde(rename = "optimizeCountSql", default)]
    pub optimize_count_sql: bool,
    #[serde(rename = "hitCount", default)]
    pub hit_count: bool,
    #[serde(rename = "searchCount", default)]
    pub search_count: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageRequest {
    #[serde(rename = "current")]
    pub page: u32,
    #[serde(rename = "size")]
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest { page: 1, page_size: 10 }
    }
}

pub mod order_by {
    pub const DEFAULT: &str = "default-desc";
    pub const PUBLISH_TIME_DESC: &str = "publish_time-desc";
    pub const PRICE_ASC: &str = "publish_price-asc";
    pub const PRICE_DESC: &str = "publish_price-desc";
}

pub const STATUS_ON_SALE: i32 = 1;
pub const STATUS_ALL: i32 = 2;
pub const STATUS_SOLD: i32 = 3;

pub const RELEASE_BUY: i32 = 0;
pub const RELEASE_SELL: i32 = 1;
pub const RELEASE_ALL: i32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct ItemListRequest {
    #[serde(rename = "orderBy")]
    pub order_by: String,
    #[serde(rename = "self")]
    pub self_flag: i32,
    /// `DictNode::eng_name` of a campus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campus: Option<String>,
    pub status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(rename = "current")]
    pub page: u32,
    #[serde(rename = "size")]
    pub page_size: u32,
    #[serde(rename = "releaseType")]
    pub release_type: i32,
}

impl Default for ItemListRequest {
    fn default() -> Self {
        ItemListRequest {
            order_by: order_by::DEFAULT.to_string(),
            self_flag: 1,
            campus: None,
            status: STATUS_ON_SALE,
            keyword: None,
            page: 1,
            page_size: 10,
            release_type: RELEASE_ALL,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemRecord {
    pub id: String,
    #[serde(rename = "publisherId")]
    pub publisher_id: String,
    #[serde(rename = "publisherName")]
    pub publisher_name: String,
    #[serde(rename = "categoryId")]
    pub category_id: String,
    #[serde(rename = "categoryIdLabel")]
    pub category_label: String,
    #[serde(rename = "imageUrls", default)]
    pub image_urls: Loose<Vec<String>>,
    #[serde(rename = "thumbnailLink", default)]
    pub thumbnail_link: Loose<Vec<String>>,
    pub description: String,
    pub mobile: String,
    #[serde(rename = "originPrice")]
    pub origin_price: String,
    #[serde(rename = "publishPrice")]
    pub publish_price: String,
    pub status: i32,
    #[serde(rename = "viewCount", default)]
    pub view_count: Option<i64>,
    #[serde(rename = "createTime")]
    pub create_time: i64,
    #[serde(rename = "publishTime")]
    pub publish_time: i64,
    pub campus: String,
    #[serde(rename = "campusLabel")]
    pub campus_label: String,
    #[serde(rename = "releaseType")]
    pub release_type: i32,
    pub contact: String,
    pub title: String,
    pub negotiable: bool,
    pub collected: i32,
    #[serde(rename = "self")]
    pub is_self: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAccount {
    pub id: String,
    #[serde(rename = "accountName")]
    pub account_name: String,
    #[serde(rename = "userNo")]
    pub user_no: String,
    pub name: String,
    #[serde(rename = "organizationName")]
    pub organization_name: String,
    #[serde(rename = "identityTypeName")]
    pub identity_type_name: String,
    #[serde(rename = "portraitUrl")]
    pub portrait_url: Option<String>,
    #[serde(rename = "genderName")]
    pub gender_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemDetail {
    #[serde(flatten)]
    pub item: ItemRecord,
    #[serde(rename = "terminalType")]
    pub terminal_type: Option<String>,
    #[serde(rename = "userAccount", default)]
    pub user_account: Loose<UserAccount>,
    /// Earlier revisions of the listing.
    #[serde(rename = "auditList", default)]
    pub audit_list: Loose<Vec<serde_json::Value>>,
    #[serde(rename = "nextTopicId")]
    pub next_topic_id: Option<String>,
}

pub struct MarketClient<'a> {
    session: &'a Session,
    headers: HeaderMap,
}

impl<'a> MarketClient<'a> {
    pub fn new(session: &'a Session, token: &str) -> Result<Self> {
        Ok(MarketClient { session, headers: headers_with_token(session, "X-Id-Token", token)? })
    }

    pub async fn login(session: &'a Session) -> Result<Option<Self>> {
        match authorize(session).await? {
            Some(token) => {
                info!("market token acquired");
                Ok(Some(MarketClient::new(session, &token)?))
            }
            None => Ok(None),
        }
    }

    fn api(&self, path: &str) -> String {
        concat_url(&self.session.settings().services.market, &format!("/api/{}", path))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        let response = self.session.client().get(self.api(path)).headers(self.headers.clone()).send().await?;
        read_json(response).await
    }

    async fn get_with<T: DeserializeOwned, Q: Serialize>(&self, path: &str, query: &Q) -> Result<ApiResponse<T>> {
        let response = self.session.client().get(self.api(path))
            .headers(self.headers.clone())
            .query(query)
            .send().await?;
        read_json(response).await
    }

    pub async fn self_info(&self) -> Result<ApiResponse<SelfInfo>> {
        self.get("user/noAvatar").await
    }

    pub async fn item_classification(&self) -> Result<ApiResponse<Vec<DictNode>>> {
        self.get("dict/tree/item-classificationy").await
    }

    pub async fn complaint_types(&self) -> Result<ApiResponse<Vec<DictNode>>> {
        self.get("dict/tree/complain-status").await
    }

    pub async fn campuses(&self) -> Result<ApiResponse<Vec<DictNode>>> {
        self.get("dict/children/campus").await
    }

    pub async fn unread_count(&self) -> Result<ApiResponse<i64>> {
        self.get("message/unReadCount").await
    }

    /// Message layout has not been observed yet.
    pub async fn messages(&self, request: &PageRequest) -> Result<ApiResponse<Page<serde_json::Value>>> {
        self.get_with("message/myMessage", request).await
    }

    pub async fn items(&self, request: &ItemListRequest) -> Result<ApiResponse<Page<ItemRecord>>> {
        self.get_with("second/page", request).await
    }

    pub async fn item_detail(&self, id: &str) -> Result<ApiResponse<ItemDetail>> {
        self.get(&format!("second/detail/{}", id)).await
    }
}
