//! One ranged GET: issue the request, stream the body into the sink.

use crate::client;
use crate::content_range;
use crate::error::RequestError;
use crate::error::SinkFault;
use crate::plan::Chunk;
use crate::progress::ProgressState;
use crate::sink::ChunkSink;
use reqwest::header;
use reqwest::Client;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a worker needs that is common to all workers.
pub(crate) struct WorkerShared {
    pub client: Client,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub retries: u32,
    pub state: Arc<ProgressState>,
    pub token: CancellationToken,
}

/// Runs one chunk to completion, retrying transient failures.
///
/// The chunk's offset survives across attempts, so a retry resumes from the
/// exact byte where the previous attempt stopped instead of refetching the
/// chunk. Only bounded chunks writing to rewindable sinks are retried: a
/// stream sink cannot take the restarted bytes twice, and an unbounded
/// chunk restarts from position zero. Returns the sink so the caller can
/// recover a reassembly buffer.
pub(crate) async fn run_worker(
    shared: Arc<WorkerShared>,
    id: usize,
    mut chunk: Chunk,
    mut sink: ChunkSink,
    publish: bool,
) -> Result<ChunkSink, RequestError> {
    let retryable = !chunk.is_unbounded() && !matches!(sink, ChunkSink::Stream(_));
    let mut attempt = 0;
    loop {
        if shared.token.is_cancelled() {
            return Err(RequestError::Cancelled);
        }
        match fetch_range(&shared, id, &mut chunk, &mut sink, publish).await {
            Ok(()) => return Ok(sink),
            Err(err) if retryable && err.is_transient() && attempt < shared.retries => {
                attempt += 1;
                tracing::warn!("worker {id} attempt {attempt} failed: {err}, retrying");
                let delay = Duration::from_millis((500 << (attempt - 1)).min(3000));
                tokio::select! {
                    _ = shared.token.cancelled() => return Err(RequestError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Issues the GET for `chunk` and copies the body into `sink`.
///
/// A bounded chunk asks for `bytes=<offset>-<end>`; the unbounded chunk of
/// an unknown-size transfer asks for the whole resource. A 206 answer with a
/// parsable `Content-Range` repositions the offset from the header; any
/// other 2xx answer restarts the chunk from position zero as a whole-body
/// download.
async fn fetch_range(
    shared: &WorkerShared,
    id: usize,
    chunk: &mut Chunk,
    sink: &mut ChunkSink,
    publish: bool,
) -> Result<(), RequestError> {
    let mut builder = shared.client.get(&shared.url);
    if !chunk.is_unbounded() {
        builder = builder.header(
            header::RANGE,
            format!("bytes={}-{}", chunk.offset, chunk.end),
        );
    }
    builder = client::apply_headers(builder, &shared.headers);

    let mut response = tokio::time::timeout(shared.timeout, builder.send())
        .await
        .map_err(|_| RequestError::Timeout)?
        .map_err(RequestError::Network)?;

    let status = response.status();
    if !status.is_success() {
        return Err(RequestError::HttpStatus(status.as_u16()));
    }

    // A 206 must carry a Content-Range; its absence degrades to a
    // whole-body response like any other 2xx.
    let partial = if status == StatusCode::PARTIAL_CONTENT {
        match response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
        {
            Some(value) => Some(content_range::parse(value)?),
            None => None,
        }
    } else {
        None
    };

    let total;
    match partial {
        Some(range) => {
            chunk.offset = range.first;
            total = range.total;
        }
        None => {
            chunk.offset = chunk.start.max(0);
            total = response
                .content_length()
                .map(|length| length as i64)
                .unwrap_or(-1);
        }
    }
    let expected_end = match partial {
        Some(_) => chunk.end,
        None => total - 1,
    };
    tracing::debug!(
        "worker {id} streaming bytes {}..={} of {total}",
        chunk.offset,
        expected_end
    );

    loop {
        let read = tokio::select! {
            _ = shared.token.cancelled() => return Err(RequestError::Cancelled),
            read = response.chunk() => read,
        };
        let Some(data) = read.map_err(RequestError::Network)? else {
            break;
        };
        if data.is_empty() {
            continue;
        }
        let received = data.len() as i64;

        match sink {
            ChunkSink::File(writer) => {
                writer
                    .write_at(chunk.offset, &data)
                    .map_err(|source| RequestError::Sink {
                        fault: SinkFault::File,
                        source,
                    })?;
            }
            ChunkSink::Stream(writer) => {
                writer
                    .write(data)
                    .await
                    .map_err(|source| RequestError::Sink {
                        fault: SinkFault::Stream,
                        source,
                    })?;
            }
            ChunkSink::Buffer(buffer) => {
                let at = (chunk.offset - chunk.start) as usize;
                let available = buffer.len().saturating_sub(at);
                let copy = available.min(data.len());
                buffer[at..at + copy].copy_from_slice(&data[..copy]);
            }
            ChunkSink::Discard => {}
        }

        chunk.offset += received;
        shared.state.add_received(received);
        if publish {
            shared
                .state
                .record(id, chunk.start, (chunk.offset - 1).max(chunk.start), chunk.end);
        }
    }

    if total > 0 && chunk.offset != expected_end + 1 {
        return Err(RequestError::Truncated);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(url: String, retries: u32) -> Arc<WorkerShared> {
        Arc::new(WorkerShared {
            client: crate::client::build("fetch-tests/0", Duration::from_secs(5), false).unwrap(),
            url,
            headers: Vec::new(),
            timeout: Duration::from_secs(5),
            retries,
            state: Arc::new(ProgressState::new(100)),
            token: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn partial_answer_fills_a_reassembly_buffer() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/resource")
            .match_header("range", "bytes=10-19")
            .with_status(206)
            .with_header("content-range", "bytes 10-19/100")
            .with_body("0123456789")
            .create_async()
            .await;

        let shared = shared(format!("{}/resource", server.url()), 0);
        let chunk = Chunk::bounded(10, 19);
        let sink = ChunkSink::Buffer(vec![0u8; 10]);
        let sink = run_worker(shared.clone(), 0, chunk, sink, false)
            .await
            .unwrap();

        match sink {
            ChunkSink::Buffer(buffer) => assert_eq!(buffer, b"0123456789"),
            _ => panic!("buffer sink expected"),
        }
        assert_eq!(shared.state.received(), 10);
    }

    #[tokio::test]
    async fn short_body_is_a_truncated_transfer() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/resource")
            .with_status(206)
            .with_header("content-range", "bytes 0-9/100")
            .with_body("0123")
            .create_async()
            .await;

        let shared = shared(format!("{}/resource", server.url()), 0);
        let err = run_worker(shared, 0, Chunk::bounded(0, 9), ChunkSink::Discard, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Truncated));
    }

    #[tokio::test]
    async fn error_status_is_permanent_and_counted_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/resource")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let shared = shared(format!("{}/resource", server.url()), 4);
        let err = run_worker(shared, 0, Chunk::bounded(0, 9), ChunkSink::Discard, false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "source http status 503");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn transient_truncation_is_retried_from_the_watermark() {
        let mut server = mockito::Server::new_async().await;
        let _first = server
            .mock("GET", "/resource")
            .match_header("range", "bytes=0-9")
            .with_status(206)
            .with_header("content-range", "bytes 0-9/100")
            .with_body("01234")
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/resource")
            .match_header("range", "bytes=5-9")
            .with_status(206)
            .with_header("content-range", "bytes 5-9/100")
            .with_body("56789")
            .expect(1)
            .create_async()
            .await;

        let shared = shared(format!("{}/resource", server.url()), 2);
        let sink = run_worker(
            shared,
            0,
            Chunk::bounded(0, 9),
            ChunkSink::Buffer(vec![0u8; 10]),
            false,
        )
        .await
        .unwrap();

        match sink {
            ChunkSink::Buffer(buffer) => assert_eq!(buffer, b"0123456789"),
            _ => panic!("buffer sink expected"),
        }
        second.assert_async().await;
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_worker() {
        let server = mockito::Server::new_async().await;
        let shared = shared(format!("{}/resource", server.url()), 4);
        shared.token.cancel();
        let err = run_worker(shared, 0, Chunk::bounded(0, 9), ChunkSink::Discard, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Cancelled));
    }
}
