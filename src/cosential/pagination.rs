use serde_json::Value;
use tracing::debug;

use super::error::{json_type_name, ApiError};
use super::session::ApiSession;

/// Fixed page size for every paged request.
pub const PAGE_SIZE: usize = 500;

/// Fetch one page of `path` starting at record offset `from`.
pub async fn fetch_page(
    session: &dyn ApiSession,
    path: &str,
    from: usize,
    size: usize,
) -> Result<Vec<Value>, ApiError> {
    if path.trim().is_empty() {
        return Err(ApiError::InvalidPath);
    }
    let body = session
        .get(path, &[("SIZE", size.to_string()), ("FROM", from.to_string())])
        .await?;
    match body {
        Value::Array(items) => Ok(items),
        other => Err(ApiError::UnexpectedShape {
            path: path.to_string(),
            expected: "array",
            found: json_type_name(&other),
        }),
    }
}

/// Fetch every page of `path` and return the concatenated items.
///
/// Walks `FROM = 0, 500, 1000, ..` until a page comes back shorter than
/// [`PAGE_SIZE`]. A total that is an exact multiple of the page size costs
/// one extra request for the empty page; the walk never stops on a count.
/// Any failed page aborts the whole fetch.
pub async fn fetch_all(session: &dyn ApiSession, path: &str) -> Result<Vec<Value>, ApiError> {
    let mut records = Vec::new();
    let mut from = 0usize;

    loop {
        let page = fetch_page(session, path, from, PAGE_SIZE).await?;
        let page_len = page.len();
        debug!(path, from, page_len, "Fetched page");
        records.extend(page);

        if page_len < PAGE_SIZE {
            break;
        }
        from += PAGE_SIZE;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosential::testing::{numbered_feed, FakeSession};
    use serde_json::json;

    async fn walk(total: usize) -> (usize, usize) {
        let session = FakeSession::new().feed("opportunities", numbered_feed(total));
        let records = fetch_all(&session, "opportunities").await.unwrap();
        (records.len(), session.request_count())
    }

    #[tokio::test]
    async fn test_exact_page_needs_extra_request() {
        assert_eq!(walk(500).await, (500, 2));
    }

    #[tokio::test]
    async fn test_one_past_page_boundary() {
        assert_eq!(walk(501).await, (501, 2));
    }

    #[tokio::test]
    async fn test_two_full_pages() {
        assert_eq!(walk(1000).await, (1000, 3));
    }

    #[tokio::test]
    async fn test_page_straddling_two_boundaries() {
        assert_eq!(walk(1001).await, (1001, 3));
    }

    #[tokio::test]
    async fn test_empty_feed_is_not_an_error() {
        assert_eq!(walk(0).await, (0, 1));
    }

    #[tokio::test]
    async fn test_paging_parameters_advance_by_page_size() {
        let session = FakeSession::new().feed("contacts", numbered_feed(1000));
        fetch_all(&session, "contacts").await.unwrap();

        let froms: Vec<String> = session
            .requests()
            .into_iter()
            .map(|r| {
                assert!(r.query.contains(&("SIZE".to_string(), "500".to_string())));
                r.query
                    .into_iter()
                    .find(|(k, _)| k == "FROM")
                    .map(|(_, v)| v)
                    .unwrap()
            })
            .collect();
        assert_eq!(froms, vec!["0", "500", "1000"]);
    }

    #[tokio::test]
    async fn test_records_keep_feed_order_across_pages() {
        let session = FakeSession::new().feed("contacts", numbered_feed(750));
        let records = fetch_all(&session, "contacts").await.unwrap();
        assert_eq!(records[0]["Id"], json!(1));
        assert_eq!(records[499]["Id"], json!(500));
        assert_eq!(records[500]["Id"], json!(501));
        assert_eq!(records[749]["Id"], json!(750));
    }

    #[tokio::test]
    async fn test_http_error_aborts_fetch() {
        let session = FakeSession::new().status("contacts", 503);
        let err = fetch_all(&session, "contacts").await.unwrap_err();
        assert!(matches!(err, ApiError::HttpStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_non_array_page_is_unexpected_shape() {
        let session = FakeSession::new().json("contacts", json!({"Id": 1}));
        let err = fetch_all(&session, "contacts").await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::UnexpectedShape {
                found: "object",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_path_rejected_without_request() {
        let session = FakeSession::new();
        let err = fetch_all(&session, "  ").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidPath));
        assert_eq!(session.request_count(), 0);
    }
}
