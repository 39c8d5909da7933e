use serde::Deserialize;

use super::{ChanReader, ReadError, Site, SiteEndpoints};
use crate::config::SiteConfig;
use crate::model::{
    BoardDescriptor, CatalogThread, FilterWatchCatalogInfoObject, PostRecord, SiteDescriptor,
    ThreadDescriptor, ThreadSnapshot,
};
use crate::util::{html_to_plain_text, validate_base_url, UrlValidationError};

/// A site exposing the common read-only JSON API:
///
/// - `{api_base}/{board}/catalog.json` - catalog pages
/// - `{api_base}/{board}/thread/{no}.json` - all posts of a thread
/// - `{media_base}/{board}/{tim}s.jpg` - thumbnails
#[derive(Debug)]
pub struct JsonApiSite {
    descriptor: SiteDescriptor,
    api_base: String,
    media_base: String,
}

impl JsonApiSite {
    pub fn new(name: &str, api_base: &str, media_base: &str) -> Result<Self, UrlValidationError> {
        Ok(Self {
            descriptor: SiteDescriptor::new(name),
            api_base: validate_base_url(api_base)?,
            media_base: validate_base_url(media_base)?,
        })
    }

    pub fn from_config(config: &SiteConfig) -> Result<Self, UrlValidationError> {
        Self::new(&config.name, &config.api_base, &config.media_base)
    }

    fn thumbnail_url(&self, board: &BoardDescriptor, tim: Option<u64>) -> Option<String> {
        tim.map(|tim| format!("{}/{}/{}s.jpg", self.media_base, board.code(), tim))
    }
}

impl Site for JsonApiSite {
    fn descriptor(&self) -> &SiteDescriptor {
        &self.descriptor
    }

    fn endpoints(&self) -> &dyn SiteEndpoints {
        self
    }

    fn reader(&self) -> &dyn ChanReader {
        self
    }
}

impl SiteEndpoints for JsonApiSite {
    fn catalog(&self, board: &BoardDescriptor) -> String {
        format!("{}/{}/catalog.json", self.api_base, board.code())
    }

    fn thread(&self, thread: &ThreadDescriptor) -> String {
        format!(
            "{}/{}/thread/{}.json",
            self.api_base,
            thread.board.code(),
            thread.op_no
        )
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    threads: Vec<WirePost>,
}

#[derive(Debug, Deserialize)]
struct ThreadDocument {
    #[serde(default)]
    posts: Vec<WirePost>,
}

/// Fields shared by catalog entries and thread posts. Flags are `0`/`1` and
/// only present on original posts.
#[derive(Debug, Deserialize)]
struct WirePost {
    no: u64,
    sub: Option<String>,
    com: Option<String>,
    tim: Option<u64>,
    #[serde(default)]
    closed: u8,
    #[serde(default)]
    archived: u8,
    bumplimit: Option<u8>,
    unique_ips: Option<u32>,
}

fn decode_subject(sub: Option<String>) -> Option<String> {
    sub.map(|s| html_to_plain_text(&s).into_owned())
        .filter(|s| !s.trim().is_empty())
}

impl ChanReader for JsonApiSite {
    fn read_filter_watch_catalog(
        &self,
        board: &BoardDescriptor,
        body: &[u8],
    ) -> Result<FilterWatchCatalogInfoObject, ReadError> {
        let pages: Vec<CatalogPage> = serde_json::from_slice(body)?;

        let threads = pages
            .into_iter()
            .flat_map(|page| page.threads)
            .map(|post| {
                CatalogThread::new(
                    ThreadDescriptor::new(board.clone(), post.no),
                    decode_subject(post.sub),
                    // Cleaned lazily, only if a comment filter needs it
                    post.com.unwrap_or_default(),
                    self.thumbnail_url(board, post.tim),
                )
            })
            .collect();

        Ok(FilterWatchCatalogInfoObject {
            board: board.clone(),
            threads,
        })
    }

    fn read_thread(
        &self,
        thread: &ThreadDescriptor,
        body: &[u8],
    ) -> Result<ThreadSnapshot, ReadError> {
        let document: ThreadDocument = serde_json::from_slice(body)?;
        let op = document.posts.first().ok_or(ReadError::EmptyThread)?;
        if op.no != thread.op_no {
            return Err(ReadError::OriginalPostMismatch {
                expected: thread.op_no,
                found: op.no,
            });
        }

        let closed = op.closed != 0;
        let archived = op.archived != 0;
        let bump_limit_reached = op.bumplimit.map(|flag| flag != 0);
        let unique_posters = op.unique_ips;

        let posts = document
            .posts
            .into_iter()
            .map(|post| PostRecord {
                no: post.no,
                subject: decode_subject(post.sub),
                comment: html_to_plain_text(post.com.as_deref().unwrap_or_default()).into_owned(),
                thumbnail_url: self.thumbnail_url(&thread.board, post.tim),
            })
            .collect();

        Ok(ThreadSnapshot {
            descriptor: thread.clone(),
            posts,
            closed,
            archived,
            bump_limit_reached,
            unique_posters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> JsonApiSite {
        JsonApiSite::new("4chan", "https://a.example.org/", "https://i.example.org").unwrap()
    }

    #[test]
    fn test_endpoints() {
        let site = site();
        let board = BoardDescriptor::create("4chan", "ck");
        assert_eq!(
            site.endpoints().catalog(&board),
            "https://a.example.org/ck/catalog.json"
        );
        assert_eq!(
            site.endpoints()
                .thread(&ThreadDescriptor::new(board, 12345)),
            "https://a.example.org/ck/thread/12345.json"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(JsonApiSite::new("x", "ftp://example.org", "https://i.example.org").is_err());
    }

    #[test]
    fn test_read_catalog_flattens_pages() {
        let body = br#"[
            {"page": 1, "threads": [
                {"no": 1, "sub": "Recipe &amp; tips", "com": "first<br>line", "tim": 1700, "ext": ".jpg"},
                {"no": 2, "com": "no subject"}
            ]},
            {"page": 2, "threads": [{"no": 3, "sub": ""}]}
        ]"#;
        let board = BoardDescriptor::create("4chan", "ck");

        let catalog = site()
            .reader()
            .read_filter_watch_catalog(&board, body)
            .unwrap();

        assert_eq!(catalog.threads.len(), 3);
        let first = &catalog.threads[0];
        assert_eq!(first.descriptor, ThreadDescriptor::new(board.clone(), 1));
        assert_eq!(first.subject.as_deref(), Some("Recipe & tips"));
        assert_eq!(first.raw_comment(), "first<br>line");
        assert_eq!(first.comment(), "first\nline");
        assert_eq!(
            first.thumbnail_url.as_deref(),
            Some("https://i.example.org/ck/1700s.jpg")
        );
        assert!(catalog.threads[1].thumbnail_url.is_none());
        assert!(catalog.threads[2].subject.is_none());
    }

    #[test]
    fn test_read_catalog_rejects_garbage() {
        let board = BoardDescriptor::create("4chan", "ck");
        let result = site().reader().read_filter_watch_catalog(&board, b"<html>");
        assert!(matches!(result, Err(ReadError::Json(_))));
    }

    #[test]
    fn test_read_thread_flags() {
        let body = br#"{"posts": [
            {"no": 10, "sub": "OP", "com": "hello", "closed": 1, "bumplimit": 0, "unique_ips": 4},
            {"no": 11, "com": "reply"},
            {"no": 14, "com": "another"}
        ]}"#;
        let thread = ThreadDescriptor::create("4chan", "ck", 10);

        let snapshot = site().reader().read_thread(&thread, body).unwrap();
        assert_eq!(snapshot.posts.len(), 3);
        assert!(snapshot.closed);
        assert!(!snapshot.archived);
        assert_eq!(snapshot.bump_limit_reached, Some(false));
        assert_eq!(snapshot.unique_posters, Some(4));
        assert_eq!(snapshot.last_post_no(), Some(14));
    }

    #[test]
    fn test_read_thread_wrong_op() {
        let body = br#"{"posts": [{"no": 99}]}"#;
        let thread = ThreadDescriptor::create("4chan", "ck", 10);
        let result = site().reader().read_thread(&thread, body);
        assert!(matches!(
            result,
            Err(ReadError::OriginalPostMismatch {
                expected: 10,
                found: 99
            })
        ));

        let result = site().reader().read_thread(&thread, br#"{"posts": []}"#);
        assert!(matches!(result, Err(ReadError::EmptyThread)));
    }
}
