//! The opening single-byte range request.

use crate::client;
use crate::content_range;
use crate::error::RequestError;
use reqwest::header;
use reqwest::Client;
use reqwest::StatusCode;
use std::time::Duration;

/// What the probe learned about the remote resource.
///
/// `total_size` is negative when the origin did not disclose a length;
/// `last_modified` is unix seconds, 0 when absent. `supports_ranges` is only
/// set when the probe received a 206 with a parsable `Content-Range` and a
/// positive complete length; anything else degrades the transfer to a single
/// connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub total_size: i64,
    pub last_modified: i64,
    pub etag: String,
    pub supports_ranges: bool,
}

/// Asks for `bytes=0-0` and inspects the answer.
///
/// For a partial answer the one-byte body is drained so the connection goes
/// back to the pool; a whole-body answer is dropped after the headers, which
/// cancels the download of a payload the probe has no use for.
pub(crate) async fn probe(
    client: &Client,
    url: &str,
    headers: &[(String, String)],
    timeout: Duration,
    dump: bool,
) -> Result<TransferInfo, RequestError> {
    let builder = client
        .get(url)
        .header(header::RANGE, "bytes=0-0");
    let request = client::apply_headers(builder, headers)
        .build()
        .map_err(RequestError::Network)?;
    if dump {
        client::dump_request(&request);
    }

    let mut response = tokio::time::timeout(timeout, client.execute(request))
        .await
        .map_err(|_| RequestError::Timeout)?
        .map_err(RequestError::Network)?;
    if dump {
        client::dump_response(&response);
    }

    let status = response.status();
    if !status.is_success() {
        return Err(RequestError::HttpStatus(status.as_u16()));
    }

    let last_modified = header_value(&response, header::LAST_MODIFIED)
        .and_then(|value| chrono::DateTime::parse_from_rfc2822(&value).ok())
        .map(|date| date.timestamp())
        .unwrap_or(0);
    let etag = header_value(&response, header::ETAG)
        .map(|value| value.trim().to_owned())
        .unwrap_or_default();
    let content_length = response
        .content_length()
        .map(|length| length as i64)
        .unwrap_or(-1);

    let partial = if status == StatusCode::PARTIAL_CONTENT {
        header_value(&response, header::CONTENT_RANGE)
            .and_then(|value| content_range::parse(&value).ok())
    } else {
        None
    };

    let info = match partial {
        Some(range) if range.total > 0 => {
            // drain the one-byte body so the connection is reusable
            while response.chunk().await.map_err(RequestError::Network)?.is_some() {}
            TransferInfo {
                total_size: range.total,
                last_modified,
                etag,
                supports_ranges: true,
            }
        }
        _ => TransferInfo {
            total_size: content_length,
            last_modified,
            etag,
            supports_ranges: false,
        },
    };

    tracing::debug!(
        size = info.total_size,
        ranges = info.supports_ranges,
        "probed source"
    );
    Ok(info)
}

fn header_value(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        crate::client::build("fetch-tests/0", Duration::from_secs(5), false).unwrap()
    }

    #[tokio::test]
    async fn partial_answer_reports_size_and_range_support() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/resource")
            .match_header("range", "bytes=0-0")
            .with_status(206)
            .with_header("content-range", "bytes 0-0/1000000")
            .with_header("last-modified", "Wed, 18 Feb 2015 23:16:09 GMT")
            .with_header("etag", "\"xyzzy\"")
            .with_body("\0")
            .create_async()
            .await;

        let info = probe(
            &client(),
            &format!("{}/resource", server.url()),
            &[],
            Duration::from_secs(5),
            false,
        )
        .await
        .unwrap();

        assert_eq!(info.total_size, 1_000_000);
        assert!(info.supports_ranges);
        assert_eq!(info.etag, "\"xyzzy\"");
        assert_eq!(info.last_modified, 1424301369);
    }

    #[tokio::test]
    async fn whole_body_answer_disables_range_support() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/resource")
            .with_status(200)
            .with_header("content-length", "4096")
            .with_body(vec![0u8; 4096])
            .create_async()
            .await;

        let info = probe(
            &client(),
            &format!("{}/resource", server.url()),
            &[],
            Duration::from_secs(5),
            false,
        )
        .await
        .unwrap();

        assert_eq!(info.total_size, 4096);
        assert!(!info.supports_ranges);
    }

    #[tokio::test]
    async fn error_status_fails_the_probe() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/resource")
            .with_status(403)
            .create_async()
            .await;

        let err = probe(
            &client(),
            &format!("{}/resource", server.url()),
            &[],
            Duration::from_secs(5),
            false,
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "source http status 403");
    }
}
