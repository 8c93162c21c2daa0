//! The coordinator: probe, plan, drive the workers, close the sink.

use crate::client;
use crate::error::RequestError;
use crate::error::SinkFault;
use crate::error::TransferError;
use crate::plan;
use crate::plan::Chunk;
use crate::probe;
use crate::progress::ProgressState;
use crate::progress::Reporter;
use crate::request::run_worker;
use crate::request::WorkerShared;
use crate::sink;
use crate::sink::ChunkSink;
use crate::sink::FileWriter;
use crate::sink::StreamWriter;
use crate::sink::Target;
use crate::sink::Upload;
use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A fully described transfer, ready to run.
///
/// Values are taken as already normalised: concurrency within `[1, 32]`,
/// `max_memory` a multiple of the concurrency with a sane floor, timeout
/// within `[1, 30]` seconds, retries capped at 4. `progress` must not be set
/// together with a stdout target, since stdout then carries the payload.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub target: Target,
    pub concurrency: usize,
    pub max_memory: i64,
    pub timeout: Duration,
    pub retries: u32,
    pub source_headers: Vec<(String, String)>,
    pub target_headers: Vec<(String, String)>,
    pub post: bool,
    pub insecure: bool,
    pub resume: bool,
    pub verbose: bool,
    pub dump: bool,
    pub progress: bool,
    pub user_agent: String,
}

/// Runs the whole transfer: probe, sink setup, chunk plan, worker pool,
/// reporter, final close.
pub async fn transfer(request: TransferRequest) -> Result<(), TransferError> {
    let client = client::build(&request.user_agent, request.timeout, request.insecure)?;
    let info = probe::probe(
        &client,
        &request.url,
        &request.source_headers,
        request.timeout,
        request.dump,
    )
    .await
    .map_err(TransferError::Probe)?;

    let workers = plan::effective_concurrency(request.concurrency, &info);
    let state = Arc::new(ProgressState::new(info.total_size));
    let shared = Arc::new(WorkerShared {
        client: client.clone(),
        url: request.url.clone(),
        headers: request.source_headers.clone(),
        timeout: request.timeout,
        retries: request.retries,
        state: state.clone(),
        token: CancellationToken::new(),
    });
    let (done, done_watch) = watch::channel(false);

    match request.target.clone() {
        Target::Discard => {
            let chunks = plan::positional_plan(info.total_size, workers);
            let sinks = chunks.iter().map(|_| ChunkSink::Discard).collect();
            let reporter = spawn_reporter(&request, &state, workers, None, done_watch);
            let result = run_positional(&shared, chunks, sinks, false).await;
            finish(result, reporter, done).await
        }

        Target::File(path) => {
            let file_sink = sink::open_file(&path, &info, request.resume)?;

            let (workers, chunks) = match &file_sink.adopted {
                Some(record) => {
                    for (id, [start, watermark, end]) in record.iter().enumerate() {
                        state.record(id, *start, *watermark, *end);
                        state.add_received(watermark - start + 1);
                    }
                    let chunks = record
                        .iter()
                        .map(|[start, watermark, end]| Chunk {
                            start: *start,
                            offset: watermark + 1,
                            end: *end,
                        })
                        .collect();
                    (record.len(), chunks)
                }
                None => (workers, plan::positional_plan(info.total_size, workers)),
            };

            let reporter =
                spawn_reporter(&request, &state, workers, file_sink.sidecar, done_watch);
            let result = if info.total_size < 0 {
                let sinks = vec![ChunkSink::Stream(StreamWriter::Sequential(file_sink.file))];
                run_positional(&shared, chunks, sinks, false).await
            } else {
                let writer = Arc::new(FileWriter::new(file_sink.file));
                let sinks = chunks.iter().map(|_| ChunkSink::File(writer.clone())).collect();
                run_positional(&shared, chunks, sinks, true).await
            };
            finish(result, reporter, done).await
        }

        Target::Stdout => {
            let chunks = plan::ordered_plan(info.total_size, workers, request.max_memory);
            let reporter = spawn_reporter(&request, &state, workers, None, done_watch);
            let writer = StreamWriter::Stdout(std::io::stdout());
            let result = run_ordered(&shared, chunks, writer, None, workers).await;
            finish(result, reporter, done).await
        }

        Target::Upload(url) => {
            let method = if request.post { Method::POST } else { Method::PUT };
            let upload = sink::spawn_upload(
                &client,
                &url,
                method,
                &request.target_headers,
                &request.user_agent,
                info.total_size,
                request.dump,
            )?;
            let chunks = plan::ordered_plan(info.total_size, workers, request.max_memory);
            let reporter = spawn_reporter(&request, &state, workers, None, done_watch);
            let writer = StreamWriter::Pipe(upload.sender.clone());
            let result = run_ordered(&shared, chunks, writer, Some(upload), workers).await;
            finish(result, reporter, done).await
        }
    }
}

fn spawn_reporter(
    request: &TransferRequest,
    state: &Arc<ProgressState>,
    concurrency: usize,
    sidecar: Option<std::path::PathBuf>,
    done: watch::Receiver<bool>,
) -> JoinHandle<()> {
    Reporter {
        state: state.clone(),
        concurrency,
        sidecar,
        verbose: request.verbose,
        progress_json: request.progress,
    }
    .spawn(done)
}

async fn finish(
    result: Result<(), TransferError>,
    reporter: JoinHandle<()>,
    done: watch::Sender<bool>,
) -> Result<(), TransferError> {
    match result {
        Ok(()) => {
            let _ = done.send(true);
            let _ = reporter.await;
            Ok(())
        }
        Err(err) => {
            reporter.abort();
            Err(err)
        }
    }
}

/// Maps a worker's failure to the transfer outcome; the sink side of the
/// failure decides the exit code.
fn worker_failure(err: RequestError) -> TransferError {
    match err {
        RequestError::Sink {
            fault: SinkFault::File,
            source,
        } => TransferError::FileSink(source),
        RequestError::Sink {
            fault: SinkFault::Stream,
            source,
        } => TransferError::TargetIo(source),
        other => TransferError::Worker(other),
    }
}

/// Runs workers whose sinks accept writes in any order (positional file,
/// discard). All chunks start at once; the first failure cancels the rest.
async fn run_positional(
    shared: &Arc<WorkerShared>,
    chunks: Vec<Chunk>,
    sinks: Vec<ChunkSink>,
    publish: bool,
) -> Result<(), TransferError> {
    let mut pool = FuturesUnordered::new();
    for (id, (chunk, sink)) in chunks.into_iter().zip(sinks).enumerate() {
        if chunk.is_complete() {
            continue;
        }
        pool.push(tokio::spawn(run_worker(
            shared.clone(),
            id,
            chunk,
            sink,
            publish,
        )));
    }

    let mut failure: Option<TransferError> = None;
    while let Some(joined) = pool.next().await {
        let result = match joined {
            Ok(result) => result.map(|_| ()),
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(_) => Err(RequestError::Cancelled),
        };
        if let Err(err) = result {
            if failure.is_none() && !matches!(err, RequestError::Cancelled) {
                shared.token.cancel();
                failure = Some(worker_failure(err));
            }
        }
    }
    failure.map_or(Ok(()), Err)
}

/// Runs workers whose sink needs bytes in strict file order (stdout,
/// upload).
///
/// Up to `workers` chunks are in flight, each into its own buffer sized for
/// the chunk. Completed buffers are parked by chunk index; the contiguous
/// prefix behind the cursor is flushed to the writer as soon as it exists,
/// and every flushed chunk frees a slot for the next unstarted one. The
/// unbounded chunk of an unknown-size transfer bypasses the reassembly and
/// streams straight into the writer.
async fn run_ordered(
    shared: &Arc<WorkerShared>,
    chunks: Vec<Chunk>,
    mut writer: StreamWriter,
    upload: Option<Upload>,
    workers: usize,
) -> Result<(), TransferError> {
    if chunks[0].is_unbounded() {
        let failure = match run_worker(shared.clone(), 0, chunks[0], ChunkSink::Stream(writer), false)
            .await
        {
            Ok(ChunkSink::Stream(mut writer)) => {
                writer.flush().err().map(TransferError::TargetIo)
            }
            Ok(_) => None,
            Err(err) => {
                shared.token.cancel();
                Some(worker_failure(err))
            }
        };
        return close_stream(failure, upload).await;
    }

    let (results_in, mut results) = mpsc::channel(workers.max(1));
    let inflight = workers.min(chunks.len());
    for index in 0..inflight {
        spawn_ordered_worker(shared, &results_in, index, chunks[index]);
    }
    let mut next = inflight;
    let mut parked: Vec<Option<Vec<u8>>> = Vec::new();
    parked.resize_with(chunks.len(), || None);
    let mut cursor = 0;
    let mut failure: Option<TransferError> = None;

    'drive: while cursor < chunks.len() {
        let Some((index, result)) = results.recv().await else {
            break;
        };
        match result {
            Ok(buffer) => parked[index] = Some(buffer),
            Err(err) => {
                shared.token.cancel();
                failure = Some(worker_failure(err));
                break;
            }
        }
        while cursor < chunks.len() {
            let Some(buffer) = parked[cursor].take() else {
                break;
            };
            if let Err(err) = writer.write(Bytes::from(buffer)).await {
                shared.token.cancel();
                failure = Some(TransferError::TargetIo(err));
                break 'drive;
            }
            cursor += 1;
            if next < chunks.len() {
                spawn_ordered_worker(shared, &results_in, next, chunks[next]);
                next += 1;
            }
        }
    }

    // Let cancelled stragglers wind down before the sink is closed.
    drop(results_in);
    while results.recv().await.is_some() {}

    if failure.is_none() {
        failure = writer.flush().err().map(TransferError::TargetIo);
    }
    drop(writer);
    close_stream(failure, upload).await
}

fn spawn_ordered_worker(
    shared: &Arc<WorkerShared>,
    results: &mpsc::Sender<(usize, Result<Vec<u8>, RequestError>)>,
    index: usize,
    chunk: Chunk,
) {
    let shared = shared.clone();
    let results = results.clone();
    tokio::spawn(async move {
        let sink = ChunkSink::Buffer(vec![0u8; chunk.len() as usize]);
        let result = run_worker(shared, index, chunk, sink, false)
            .await
            .map(|sink| match sink {
                ChunkSink::Buffer(buffer) => buffer,
                _ => Vec::new(),
            });
        let _ = results.send((index, result)).await;
    });
}

/// Closes the ordered sink. For an upload this means waiting for the
/// target's verdict; when the body pipe broke mid-transfer, that verdict is
/// the actual failure and replaces the local broken-pipe error.
async fn close_stream(
    failure: Option<TransferError>,
    upload: Option<Upload>,
) -> Result<(), TransferError> {
    let Some(upload) = upload else {
        return failure.map_or(Ok(()), Err);
    };
    let verdict = upload.finish().await;
    match (failure, verdict) {
        (None, verdict) => verdict,
        (Some(TransferError::TargetIo(_)), Err(upload_err)) => Err(upload_err),
        (Some(err), _) => Err(err),
    }
}
