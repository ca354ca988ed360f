use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use distill_cache::CacheController;
use distill_core::{
    poll_until_ready, BookId, DistilledPage, Document, EngineConfig, FetchError, PollResponse,
    ProgressStore, Section, SectionContentSource,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use url::form_urlencoded;

use crate::keys;
use crate::models::{
    AllContentSectionsResponse, BookResponse, CheckInResponse, ContentSectionRange,
    DistilledContentResponse, GetBooksResponse, LastCheckInsResponse, PostBookRequest,
    PostBookResponse, SetBookUploadedRequest,
};
use crate::parse::{parse, Validate};
use crate::transport::{HttpReply, Method, Transport};

const STATUS_OK: u16 = 200;
const STATUS_ACCEPTED: u16 = 202;

/// Typed access to the remote API. Reads go through the local cache with
/// the TTL configured for their key family.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    cache: Arc<CacheController>,
    config: EngineConfig,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<CacheController>,
        config: EngineConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<CacheController> {
        &self.cache
    }

    pub async fn get_book(&self, book: &BookId) -> Result<BookResponse, FetchError> {
        let path = format!("/book/{}", segment(book));
        self.cache
            .get_or_fetch(&keys::book(book), Some(self.config.ttl.book), || async move {
                self.fetch(Method::Get, &path, None).await
            })
            .await
    }

    pub async fn list_books(&self) -> Result<GetBooksResponse, FetchError> {
        self.cache
            .get_or_fetch(keys::ALL_BOOKS, Some(self.config.ttl.book_list), || async move {
                self.fetch(Method::Get, "/book", None).await
            })
            .await
    }

    pub async fn create_book(&self, kind: &str) -> Result<PostBookResponse, FetchError> {
        let body = to_body(&PostBookRequest {
            kind: kind.to_string(),
        })?;
        let created: PostBookResponse = self.fetch(Method::Post, "/book", Some(body)).await?;
        self.cache.invalidate(keys::ALL_BOOKS).await?;
        info!(book = %created.book_id, "created book");
        Ok(created)
    }

    pub async fn mark_uploaded(&self, book: &BookId) -> Result<(), FetchError> {
        let body = to_body(&SetBookUploadedRequest {
            book_id: book.clone(),
        })?;
        self.send_ok(Method::Patch, "/set_book_uploaded", Some(body))
            .await?;
        self.cache.invalidate(&keys::book(book)).await?;
        self.cache.invalidate(keys::ALL_BOOKS).await?;
        Ok(())
    }

    pub async fn get_content_section(
        &self,
        book: &BookId,
        page: u32,
    ) -> Result<ContentSectionRange, FetchError> {
        let path = format!(
            "/get_content_section?{}",
            query(&[("book_id", book.as_str()), ("page_num", &page.to_string())])
        );
        self.cache
            .get_or_fetch(
                &keys::content_section(book, page),
                Some(self.config.ttl.content_section),
                || async move { self.fetch(Method::Get, &path, None).await },
            )
            .await
    }

    pub async fn list_content_sections(
        &self,
        book: &BookId,
    ) -> Result<AllContentSectionsResponse, FetchError> {
        let path = format!("/content_section?{}", query(&[("book_id", book.as_str())]));
        self.cache
            .get_or_fetch(
                &keys::all_content_sections(book),
                Some(self.config.ttl.section_lists),
                || async move { self.fetch(Method::Get, &path, None).await },
            )
            .await
    }

    /// Section layout of a book, ready for a reader session.
    pub async fn load_document(&self, book: &BookId) -> Result<Document, FetchError> {
        Ok(self.list_content_sections(book).await?.to_document(book))
    }

    /// Condensed content for a page range. A cache miss starts or joins the
    /// distillation job and polls it until the content is ready.
    #[instrument(skip(self))]
    pub async fn get_distilled_content(
        &self,
        book: &BookId,
        start_page: u32,
        end_page: u32,
    ) -> Result<DistilledPage, FetchError> {
        let path = format!(
            "/get_distilled_content?{}",
            query(&[
                ("book_id", book.as_str()),
                ("start_page", &start_page.to_string()),
                ("end_page", &end_page.to_string()),
            ])
        );
        let policy = self.config.poll_policy();
        self.cache
            .get_or_fetch(
                &keys::distilled_content(book, start_page, end_page),
                Some(self.config.ttl.distilled_content),
                || async move {
                    poll_until_ready(policy, |attempt| {
                        let path = path.as_str();
                        async move {
                            let reply = self.transport.send(Method::Get, path, None).await?;
                            debug!(attempt, status = reply.status, "polled distilled content");
                            distilled_poll_response(&reply)
                        }
                    })
                    .await
                },
            )
            .await
    }

    pub async fn set_book_progress(&self, book: &BookId, page: u32) -> Result<(), FetchError> {
        let path = format!("/book/{}/progress", segment(book));
        self.send_ok(Method::Patch, &path, Some(json!({ "progress": page })))
            .await
    }

    pub async fn save_check_in(&self) -> Result<CheckInResponse, FetchError> {
        self.fetch(Method::Post, "/save_check_in", None).await
    }

    pub async fn last_check_ins(&self, n: u32) -> Result<LastCheckInsResponse, FetchError> {
        let path = format!("/get_last_n_check_in?{}", query(&[("n", &n.to_string())]));
        self.cache
            .get_or_fetch(
                &keys::last_check_ins(n),
                Some(self.config.ttl.check_ins),
                || async move { self.fetch(Method::Get, &path, None).await },
            )
            .await
    }

    /// Stores a local configuration entry. A missing or zero `ttl` falls
    /// back to the configured app-config TTL.
    pub async fn set_app_config(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), FetchError> {
        let ttl = ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(self.config.ttl.app_config);
        self.cache.set(&keys::app_config(key), value, Some(ttl)).await?;
        debug!(key, ?ttl, "stored app config");
        Ok(())
    }

    pub async fn get_app_config(&self, key: &str) -> Result<Option<Value>, FetchError> {
        self.cache.probe(&keys::app_config(key)).await
    }

    pub async fn remove_app_config(&self, key: &str) -> Result<(), FetchError> {
        Ok(self.cache.invalidate(&keys::app_config(key)).await?)
    }

    pub async fn clear_cache(&self) -> Result<(), FetchError> {
        Ok(self.cache.clear().await?)
    }

    pub async fn purge_cache(&self) -> Result<u64, FetchError> {
        Ok(self.cache.purge_expired().await?)
    }

    async fn fetch<T>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, FetchError>
    where
        T: DeserializeOwned + Validate,
    {
        let reply = self.transport.send(method, path, body).await?;
        if !reply.is_success() {
            return Err(reply.to_error());
        }
        Ok(parse(&reply.body)?)
    }

    async fn send_ok(&self, method: Method, path: &str, body: Option<Value>) -> Result<(), FetchError> {
        let reply = self.transport.send(method, path, body).await?;
        if !reply.is_success() {
            return Err(reply.to_error());
        }
        Ok(())
    }
}

#[async_trait]
impl SectionContentSource for ApiClient {
    async fn load(&self, book: &BookId, section: &Section) -> Result<DistilledPage, FetchError> {
        self.get_distilled_content(book, section.start_page, section.end_page)
            .await
    }
}

#[async_trait]
impl ProgressStore for ApiClient {
    async fn save_progress(&self, book: &BookId, page: u32) -> Result<(), FetchError> {
        self.set_book_progress(book, page).await
    }
}

/// 200 carries the content. Any other success status means the job is still
/// running; every failure status ends polling.
fn distilled_poll_response(reply: &HttpReply) -> Result<PollResponse<DistilledPage>, FetchError> {
    match reply.status {
        STATUS_OK => {
            let response: DistilledContentResponse = parse(&reply.body)?;
            Ok(PollResponse::Ready(response.into()))
        }
        STATUS_ACCEPTED => Ok(PollResponse::Pending),
        _ if reply.is_success() => Ok(PollResponse::Pending),
        _ => Err(reply.to_error()),
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, FetchError> {
    serde_json::to_value(value).map_err(|err| FetchError::Malformed(err.to_string()))
}

fn query(pairs: &[(&str, &str)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn segment(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use distill_cache::MemoryStore;
    use distill_core::ManualClock;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<HttpReply>>,
        requests: Mutex<Vec<(Method, String, Option<Value>)>>,
    }

    impl ScriptedTransport {
        fn with(replies: Vec<HttpReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::default(),
            })
        }

        fn paths(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .map(|(_, path, _)| path.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            method: Method,
            path_and_query: &str,
            body: Option<Value>,
        ) -> Result<HttpReply, FetchError> {
            self.requests
                .lock()
                .push((method, path_and_query.to_string(), body));
            self.replies
                .lock()
                .pop_front()
                .ok_or_else(|| FetchError::Transport("no scripted reply".into()))
        }
    }

    fn client(transport: Arc<ScriptedTransport>, config: EngineConfig) -> (ApiClient, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = CacheController::new(Arc::new(MemoryStore::new()), clock.clone());
        (ApiClient::new(transport, Arc::new(cache), config), clock)
    }

    const DISTILLED: &str = r#"{"distilled_page":{"book_id":"b1","user_id":"u1","start_page":5,"end_page":9,
        "paragraphs":[{"type":"core","content":"Gist.","pages":[5,6]}],"processing_status":"COMPLETED"}}"#;

    #[tokio::test(start_paused = true)]
    async fn distilled_content_is_polled_then_cached() {
        let transport = ScriptedTransport::with(vec![
            HttpReply::new(202, "Processing started"),
            HttpReply::new(202, "Processing in progress"),
            HttpReply::new(200, DISTILLED),
        ]);
        let (client, _) = client(transport.clone(), EngineConfig::default());
        let book = "b1".to_string();

        let page = client.get_distilled_content(&book, 5, 9).await.unwrap();
        assert_eq!(page.paragraphs.len(), 1);
        assert_eq!(transport.paths().len(), 3);
        assert_eq!(
            transport.paths()[0],
            "/get_distilled_content?book_id=b1&start_page=5&end_page=9"
        );

        let again = client.get_distilled_content(&book, 5, 9).await.unwrap();
        assert_eq!(again, page);
        assert_eq!(transport.paths().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_success_statuses_keep_polling() {
        let transport = ScriptedTransport::with(vec![
            HttpReply::new(204, ""),
            HttpReply::new(201, "Job queued"),
            HttpReply::new(200, DISTILLED),
        ]);
        let (client, _) = client(transport.clone(), EngineConfig::default());

        let page = client
            .get_distilled_content(&"b1".to_string(), 5, 9)
            .await
            .unwrap();
        assert_eq!((page.start_page, page.end_page), (5, 9));
        assert_eq!(transport.paths().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_sections_stop_polling() {
        let transport = ScriptedTransport::with(vec![HttpReply::new(
            404,
            r#"{"detail":"No content sections of page range found"}"#,
        )]);
        let (client, _) = client(transport.clone(), EngineConfig::default());

        let err = client
            .get_distilled_content(&"b1".to_string(), 1, 4)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Network {
                status: 404,
                message: "No content sections of page range found".into()
            }
        );
        assert_eq!(transport.paths().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_gives_up_and_caches_nothing() {
        let transport = ScriptedTransport::with(vec![HttpReply::new(202, ""); 4]);
        let config = EngineConfig {
            poll_max_attempts: 3,
            ..EngineConfig::default()
        };
        let (client, _) = client(transport.clone(), config);
        let book = "b1".to_string();

        let err = client.get_distilled_content(&book, 1, 4).await.unwrap_err();
        assert_eq!(err, FetchError::PollTimeout { attempts: 3 });
        assert!(err.is_still_processing());
        assert_eq!(
            client
                .cache()
                .probe::<DistilledPage>(&keys::distilled_content(&book, 1, 4))
                .await,
            Ok(None)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loader_source_uses_section_range() {
        let transport = ScriptedTransport::with(vec![HttpReply::new(200, DISTILLED)]);
        let (client, _) = client(transport.clone(), EngineConfig::default());
        let section = Section {
            index: 1,
            start_page: 5,
            end_page: 9,
            title: "Pages 5-9".into(),
        };

        let page = client.load(&"b1".to_string(), &section).await.unwrap();
        assert_eq!(page.start_page, 5);
        assert!(transport.paths()[0].contains("start_page=5&end_page=9"));
    }

    #[tokio::test]
    async fn progress_is_patched() {
        let transport = ScriptedTransport::with(vec![HttpReply::new(200, "null")]);
        let (client, _) = client(transport.clone(), EngineConfig::default());

        client.save_progress(&"b 1".to_string(), 42).await.unwrap();
        let requests = transport.requests.lock();
        let (method, path, body) = &requests[0];
        assert_eq!(*method, Method::Patch);
        assert_eq!(path, "/book/b+1/progress");
        assert_eq!(body, &Some(json!({ "progress": 42 })));
    }

    #[tokio::test]
    async fn book_metadata_expires_almost_immediately() {
        let book = r#"{"book_id":"b1","download_url":"https://files.example.com/b1.pdf"}"#;
        let transport = ScriptedTransport::with(vec![
            HttpReply::new(200, book),
            HttpReply::new(200, book),
        ]);
        let (client, clock) = client(transport.clone(), EngineConfig::default());
        let id = "b1".to_string();

        client.get_book(&id).await.unwrap();
        clock.advance(Duration::from_millis(2));
        client.get_book(&id).await.unwrap();
        assert_eq!(transport.paths(), vec!["/book/b1", "/book/b1"]);
    }

    #[tokio::test]
    async fn sections_are_cached_per_book() {
        let body = r#"{"content_sections":[
            {"book_id":"b1","start_page":1,"end_page":4},
            {"book_id":"b1","start_page":5,"end_page":9}
        ]}"#;
        let transport = ScriptedTransport::with(vec![HttpReply::new(200, body)]);
        let (client, _) = client(transport.clone(), EngineConfig::default());
        let book = "b1".to_string();

        let document = client.load_document(&book).await.unwrap();
        assert_eq!(document.sections.len(), 2);
        assert_eq!(document.total_pages, 9);
        client.list_content_sections(&book).await.unwrap();
        assert_eq!(transport.paths(), vec!["/content_section?book_id=b1"]);
    }

    #[tokio::test]
    async fn app_config_stays_local() {
        let transport = ScriptedTransport::with(Vec::new());
        let (client, clock) = client(transport.clone(), EngineConfig::default());

        client
            .set_app_config("theme", &json!("sepia"), None)
            .await
            .unwrap();
        assert_eq!(client.get_app_config("theme").await, Ok(Some(json!("sepia"))));

        clock.advance(Duration::from_secs(61));
        assert_eq!(client.get_app_config("theme").await, Ok(None));

        client
            .set_app_config("font", &json!(18), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        client.remove_app_config("font").await.unwrap();
        assert_eq!(client.get_app_config("font").await, Ok(None));
        assert!(transport.paths().is_empty());
    }

    #[tokio::test]
    async fn malformed_bodies_are_reported() {
        let transport = ScriptedTransport::with(vec![HttpReply::new(200, "<html>oops</html>")]);
        let (client, _) = client(transport, EngineConfig::default());
        let err = client.list_books().await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }
}
