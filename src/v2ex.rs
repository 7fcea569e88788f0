use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::paging::{ListingFetcher, ListingPage, PageKey, PagingConfig};

pub const DEFAULT_BASE_URL: &str = "https://www.v2ex.com/api/v2/";
pub const DEFAULT_SEARCH_URL: &str = "https://www.sov2ex.com/api/search";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub search_url: Option<String>,
    pub token: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    search_url: Url,
    token: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("v2ex client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut base_url = Url::parse(&base).with_context(|| format!("parse base url {base:?}"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let search = config
            .search_url
            .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string());
        let search_url =
            Url::parse(&search).with_context(|| format!("parse search url {search:?}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            search_url,
            token: config.token.filter(|token| !token.trim().is_empty()),
        })
    }

    pub async fn notifications(&self, page: PageKey) -> Result<ListingPage<Notification>> {
        self.fetch_listing(&["notifications"], page)
            .await
            .context("fetch notifications")
    }

    pub async fn node_topics(&self, node: &str, page: PageKey) -> Result<ListingPage<Topic>> {
        if node.trim().is_empty() {
            bail!("v2ex: node name is required");
        }
        self.fetch_listing(&["nodes", node, "topics"], page)
            .await
            .with_context(|| format!("fetch topics of node {node}"))
    }

    pub async fn topic_replies(&self, topic_id: u64, page: PageKey) -> Result<ListingPage<Reply>> {
        let id = topic_id.to_string();
        self.fetch_listing(&["topics", &id, "replies"], page)
            .await
            .with_context(|| format!("fetch replies of topic {topic_id}"))
    }

    /// Topics started by `username`.
    ///
    /// Only the v1 API serves this listing, and it answers with the whole
    /// list at once, so pages are cut locally.
    pub async fn member_topics(
        &self,
        username: &str,
        page: PageKey,
        paging: PagingConfig,
    ) -> Result<ListingPage<Topic>> {
        if username.trim().is_empty() {
            bail!("v2ex: username is required");
        }
        let url = self.member_topics_url(username)?;
        let body = self
            .get(url, true)
            .await
            .with_context(|| format!("fetch topics of member {username}"))?;
        let topics: Vec<Topic> =
            serde_json::from_str(&body).context("v2ex: decode member topics")?;
        Ok(slice_page(topics, page, paging))
    }

    /// Full text search through sov2ex; `from` is the offset of `page`.
    pub async fn search(
        &self,
        keyword: &str,
        page: PageKey,
        paging: PagingConfig,
    ) -> Result<ListingPage<SearchHit>> {
        if keyword.trim().is_empty() {
            bail!("v2ex: search keyword is required");
        }
        let url = self.search_url(keyword, page, paging);
        // Third-party service; the token stays with v2ex.
        let body = self
            .get(url, false)
            .await
            .with_context(|| format!("search {keyword:?}"))?;
        decode_search(&body)
    }

    fn listing_url(&self, segments: &[&str], page: PageKey) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("v2ex: base url cannot hold a path"))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("p", &page.to_string());
        Ok(url)
    }

    fn member_topics_url(&self, username: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join("../topics/show.json")
            .context("v2ex: derive v1 api url")?;
        url.query_pairs_mut().append_pair("username", username);
        Ok(url)
    }

    fn search_url(&self, keyword: &str, page: PageKey, paging: PagingConfig) -> Url {
        let size = u64::from(paging.items_per_page);
        let from = u64::from(page.get() - 1) * size;
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("q", keyword)
            .append_pair("from", &from.to_string())
            .append_pair("size", &size.to_string());
        url
    }

    async fn fetch_listing<T>(&self, segments: &[&str], page: PageKey) -> Result<ListingPage<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.listing_url(segments, page)?;
        let body = self.get(url, true).await?;
        decode_listing(&body)
    }

    async fn get(&self, url: Url, authorized: bool) -> Result<String> {
        debug!(%url, "requesting listing");

        let mut req = self.http.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(token) = self.token.as_ref().filter(|_| authorized) {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return match status.as_u16() {
                401 => Err(anyhow!("v2ex: unauthorized")),
                403 => Err(anyhow!("v2ex: forbidden")),
                429 => Err(anyhow!("v2ex: rate limited: {}", body)),
                _ => Err(anyhow!("v2ex: api error {}: {}", status, body)),
            };
        }
        Ok(body)
    }
}

/// Cuts page `page` out of a listing the server returned in one piece.
fn slice_page<T>(all: Vec<T>, page: PageKey, paging: PagingConfig) -> ListingPage<T> {
    let total = all.len() as u64;
    let per_page = paging.items_per_page as usize;
    let skip = (page.get() as usize - 1).saturating_mul(per_page);
    let items = all.into_iter().skip(skip).take(per_page).collect();
    ListingPage::new(items, total)
}

/// Decodes the `{success, message, result, pagination}` envelope.
pub fn decode_listing<T>(body: &str) -> Result<ListingPage<T>>
where
    T: DeserializeOwned,
{
    let envelope: Envelope<T> = serde_json::from_str(body).context("v2ex: decode listing")?;
    if !envelope.success {
        bail!(
            "v2ex: request rejected: {}",
            envelope.message.unwrap_or_else(|| "no message".into())
        );
    }
    let total = match envelope.pagination {
        Some(pagination) => pagination.total,
        None => envelope.result.len() as u64,
    };
    Ok(ListingPage::new(envelope.result, total))
}

/// Decodes a sov2ex response: `{ total, hits: [{ _source: { .. } }] }`.
pub fn decode_search(body: &str) -> Result<ListingPage<SearchHit>> {
    let response: SearchResponse = serde_json::from_str(body).context("sov2ex: decode search")?;
    let hits = response.hits.into_iter().map(|hit| hit.source).collect();
    Ok(ListingPage::new(hits, response.total))
}

#[derive(Debug, Clone, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default = "Vec::new")]
    result: Vec<T>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    #[serde(default)]
    pub per_page: u32,
    pub total: u64,
    #[serde(default)]
    pub pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Member {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    #[serde(default)]
    pub member_id: u64,
    #[serde(default)]
    pub for_member_id: u64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub payload_rendered: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub member: Member,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_rendered: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub replies: u64,
    #[serde(default)]
    pub last_reply_by: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reply {
    pub id: u64,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_rendered: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub member: Member,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default = "Vec::new")]
    hits: Vec<RawSearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSearchHit {
    #[serde(rename = "_source")]
    source: SearchHit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchHit {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Node id.
    #[serde(default)]
    pub node: u64,
    #[serde(default)]
    pub replies: u64,
    /// Author's username.
    #[serde(default)]
    pub member: String,
    /// Local time as sov2ex formats it, e.g. `2019-05-23T03:33:16`.
    #[serde(default)]
    pub created: String,
}

pub struct NotificationListing {
    client: Arc<Client>,
}

impl NotificationListing {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

impl ListingFetcher<Notification> for NotificationListing {
    async fn fetch(&self, page: PageKey) -> Result<ListingPage<Notification>> {
        self.client.notifications(page).await
    }
}

pub struct NodeTopicsListing {
    client: Arc<Client>,
    node: String,
}

impl NodeTopicsListing {
    pub fn new(client: Arc<Client>, node: impl Into<String>) -> Self {
        Self {
            client,
            node: node.into(),
        }
    }
}

impl ListingFetcher<Topic> for NodeTopicsListing {
    async fn fetch(&self, page: PageKey) -> Result<ListingPage<Topic>> {
        self.client.node_topics(&self.node, page).await
    }
}

pub struct TopicRepliesListing {
    client: Arc<Client>,
    topic_id: u64,
}

impl TopicRepliesListing {
    pub fn new(client: Arc<Client>, topic_id: u64) -> Self {
        Self { client, topic_id }
    }
}

impl ListingFetcher<Reply> for TopicRepliesListing {
    async fn fetch(&self, page: PageKey) -> Result<ListingPage<Reply>> {
        self.client.topic_replies(self.topic_id, page).await
    }
}

pub struct MemberTopicsListing {
    client: Arc<Client>,
    username: String,
    paging: PagingConfig,
}

impl MemberTopicsListing {
    /// `paging` must match the sequencer's so local pages line up.
    pub fn new(client: Arc<Client>, username: impl Into<String>, paging: PagingConfig) -> Self {
        Self {
            client,
            username: username.into(),
            paging,
        }
    }
}

impl ListingFetcher<Topic> for MemberTopicsListing {
    async fn fetch(&self, page: PageKey) -> Result<ListingPage<Topic>> {
        self.client
            .member_topics(&self.username, page, self.paging)
            .await
    }
}

pub struct SearchListing {
    client: Arc<Client>,
    keyword: String,
    paging: PagingConfig,
}

impl SearchListing {
    pub fn new(client: Arc<Client>, keyword: impl Into<String>, paging: PagingConfig) -> Self {
        Self {
            client,
            keyword: keyword.into(),
            paging,
        }
    }
}

impl ListingFetcher<SearchHit> for SearchListing {
    async fn fetch(&self, page: PageKey) -> Result<ListingPage<SearchHit>> {
        self.client.search(&self.keyword, page, self.paging).await
    }
}

/// Accepts `123`, `/t/123#reply4` or a full topic URL.
pub fn topic_id_from_link(link: &str) -> Option<u64> {
    static TOPIC_LINK_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:https?://[^/]+)?/t/(\d+)(?:[#?].*)?$").expect("valid topic link regex")
    });

    let link = link.trim();
    if let Ok(id) = link.parse::<u64>() {
        return Some(id);
    }
    TOPIC_LINK_RE
        .captures(link)
        .and_then(|caps| caps[1].parse().ok())
}

/// Accepts `python`, `/go/python` or a full node URL.
pub fn node_name_from_link(link: &str) -> Option<String> {
    static NODE_LINK_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:(?:https?://[^/]+)?/go/)?([A-Za-z0-9_-]+)/?(?:[#?].*)?$")
            .expect("valid node link regex")
    });

    NODE_LINK_RE
        .captures(link.trim())
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> Client {
        Client::new(ClientConfig {
            user_agent: "v2ex-pager-test".into(),
            base_url: Some(base.into()),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn requires_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }

    #[test]
    fn builds_listing_urls() {
        let c = client("https://example.test/api/v2");
        let url = c
            .listing_url(&["nodes", "python", "topics"], PageKey::new(3).unwrap())
            .unwrap();
        assert_eq!(url.as_str(), "https://example.test/api/v2/nodes/python/topics?p=3");

        let url = c
            .listing_url(&["nodes", "a b", "topics"], PageKey::FIRST)
            .unwrap();
        assert_eq!(url.as_str(), "https://example.test/api/v2/nodes/a%20b/topics?p=1");
    }

    #[test]
    fn builds_member_topics_and_search_urls() {
        let c = Client::new(ClientConfig {
            user_agent: "v2ex-pager-test".into(),
            base_url: Some("https://example.test/api/v2".into()),
            search_url: Some("https://search.test/api/search".into()),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            c.member_topics_url("livid").unwrap().as_str(),
            "https://example.test/api/topics/show.json?username=livid"
        );
        let url = c.search_url("rust async", PageKey::new(3).unwrap(), PagingConfig::new(10));
        assert_eq!(
            url.as_str(),
            "https://search.test/api/search?q=rust+async&from=20&size=10"
        );
    }

    #[test]
    fn slices_single_response_listings_locally() {
        let all: Vec<u32> = (0..7).collect();
        let paging = PagingConfig::new(3);

        let page = slice_page(all.clone(), PageKey::new(3).unwrap(), paging);
        assert_eq!(page.items, vec![6]);
        assert_eq!(page.total_item_count, 7);

        let page = slice_page(all, PageKey::new(4).unwrap(), paging);
        assert!(page.items.is_empty());
        assert_eq!(page.total_item_count, 7);
    }

    #[test]
    fn decodes_search_hits() {
        let body = r#"{
            "took": 12, "timed_out": false, "total": 31,
            "hits": [
                {"_score": 3.2, "_id": "100", "_source": {
                    "id": 100, "title": "tokio or async-std", "content": "which one",
                    "node": 17, "replies": 4, "member": "livid",
                    "created": "2019-05-23T03:33:16"}},
                {"_id": "101", "_source": {"id": 101}}
            ]
        }"#;
        let page = decode_search(body).unwrap();
        assert_eq!(page.total_item_count, 31);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].member, "livid");
        assert_eq!(page.items[0].replies, 4);
        assert_eq!(page.items[1].title, "");
        assert!(decode_search("not json").is_err());
    }

    #[test]
    fn decodes_paginated_envelope() {
        let body = r#"{
            "success": true,
            "message": "Current page 2 of 3",
            "result": [
                {"id": 11, "member_id": 2, "for_member_id": 1, "text": "replied",
                 "payload": "hi", "payload_rendered": "<p>hi</p>", "created": 1700000000,
                 "member": {"username": "livid"}}
            ],
            "pagination": {"per_page": 10, "total": 21, "pages": 3}
        }"#;
        let page: ListingPage<Notification> = decode_listing(body).unwrap();
        assert_eq!(page.total_item_count, 21);
        assert_eq!(page.side_channel_count, None);
        assert_eq!(page.items[0].member.username, "livid");
        assert_eq!(page.items[0].created.timestamp(), 1_700_000_000);
    }

    #[test]
    fn missing_pagination_counts_result() {
        let body = r#"{"success": true, "result": [
            {"id": 1, "content": "a", "content_rendered": "a", "created": 1, "member": {"id": 5, "username": "x"}},
            {"id": 2, "content": "b", "content_rendered": "b", "created": 2}
        ]}"#;
        let page: ListingPage<Reply> = decode_listing(body).unwrap();
        assert_eq!(page.total_item_count, 2);
        assert_eq!(page.items[1].member, Member::default());
    }

    #[test]
    fn rejected_envelope_is_an_error() {
        let body = r#"{"success": false, "message": "Invalid token"}"#;
        let err = decode_listing::<Topic>(body).unwrap_err();
        assert!(err.to_string().contains("Invalid token"), "{err}");
        assert!(decode_listing::<Topic>("<html>").is_err());
    }

    #[test]
    fn parses_topic_links() {
        assert_eq!(topic_id_from_link("123"), Some(123));
        assert_eq!(topic_id_from_link("/t/123#reply4"), Some(123));
        assert_eq!(topic_id_from_link("https://www.v2ex.com/t/987?p=2"), Some(987));
        assert_eq!(topic_id_from_link("/go/python"), None);
    }

    #[test]
    fn parses_node_links() {
        assert_eq!(node_name_from_link("python").as_deref(), Some("python"));
        assert_eq!(node_name_from_link("/go/qna").as_deref(), Some("qna"));
        assert_eq!(
            node_name_from_link("https://www.v2ex.com/go/share#top").as_deref(),
            Some("share")
        );
        assert_eq!(node_name_from_link("/t/123"), None);
    }
}
