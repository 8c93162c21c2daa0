//! Where the bytes go: discard, stdout, positional file, or HTTP upload.

use crate::client;
use crate::error::SetupError;
use crate::error::TransferError;
use crate::probe::TransferInfo;
use crate::resume;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header;
use reqwest::Client;
use reqwest::Method;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

/// Transfer destination, parsed from the second positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Bytes are counted and thrown away.
    Discard,
    /// Bytes are written to stdout, in file order.
    Stdout,
    /// Bytes are written at their absolute position in a local file.
    File(PathBuf),
    /// Bytes are streamed, in file order, into a PUT or POST request.
    Upload(String),
}

impl Target {
    pub fn parse(argument: &str) -> Target {
        match argument {
            "" => Target::Discard,
            "-" => Target::Stdout,
            url if url.starts_with("http://") || url.starts_with("https://") => {
                Target::Upload(url.to_owned())
            }
            path => Target::File(PathBuf::from(path)),
        }
    }
}

/// Positional writer over the shared target file.
///
/// Workers write disjoint ranges, but the file handle must see one write
/// call at a time; the mutex is held across the seek+write pair only.
#[derive(Debug)]
pub(crate) struct FileWriter {
    file: Mutex<File>,
}

impl FileWriter {
    pub(crate) fn new(file: File) -> Self {
        FileWriter {
            file: Mutex::new(file),
        }
    }

    pub(crate) fn write_at(&self, offset: i64, data: &[u8]) -> std::io::Result<()> {
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)
    }
}

/// In-order byte consumer for stream-shaped sinks.
#[derive(Debug)]
pub(crate) enum StreamWriter {
    Stdout(std::io::Stdout),
    /// Feed of the upload request body.
    Pipe(mpsc::Sender<Bytes>),
    /// Sequential writes into the target file (unknown-size transfers).
    Sequential(File),
}

impl StreamWriter {
    pub(crate) async fn write(&mut self, data: Bytes) -> std::io::Result<()> {
        match self {
            StreamWriter::Stdout(stdout) => stdout.write_all(&data),
            StreamWriter::Sequential(file) => file.write_all(&data),
            StreamWriter::Pipe(sender) => sender.send(data).await.map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upload stream closed")
            }),
        }
    }

    pub(crate) fn flush(&mut self) -> std::io::Result<()> {
        match self {
            StreamWriter::Stdout(stdout) => stdout.flush(),
            StreamWriter::Sequential(file) => file.flush(),
            StreamWriter::Pipe(_) => Ok(()),
        }
    }
}

/// What a worker does with each received buffer.
///
/// Keeping this a closed sum means the request loop never knows which of the
/// four sink shapes it feeds.
#[derive(Debug)]
pub(crate) enum ChunkSink {
    /// Positional write at the current offset.
    File(std::sync::Arc<FileWriter>),
    /// In-order append; only ever handed to a single worker.
    Stream(StreamWriter),
    /// Reassembly buffer covering exactly the worker's chunk.
    Buffer(Vec<u8>),
    /// Count only.
    Discard,
}

/// An opened file target with its optional resume state.
pub(crate) struct FileSink {
    pub file: File,
    /// Path of the sidecar to keep current, when resume applies.
    pub sidecar: Option<PathBuf>,
    /// Validated per-worker table adopted from a previous run.
    pub adopted: Option<Vec<[i64; 3]>>,
}

/// Opens (and sizes) the target file, applying the resume protocol.
///
/// A missing target or disabled resume invalidates any stale sidecar. A
/// known size pre-extends the file so workers can write at any position;
/// sparse file semantics keep this cheap.
pub(crate) fn open_file(
    path: &Path,
    info: &TransferInfo,
    resume_enabled: bool,
) -> Result<FileSink, SetupError> {
    let existed = path.is_file();
    if !existed || !resume_enabled {
        resume::remove_sidecar(path);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| SetupError::CreateDir {
                path: parent.to_owned(),
                source,
            })?;
        }
    }

    let adopted = if resume_enabled && existed && info.total_size >= 0 {
        resume::load(path, info.total_size, info.last_modified)
    } else {
        None
    };

    let file = if info.total_size < 0 {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
    } else {
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
    }
    .map_err(|source| SetupError::OpenTarget {
        path: path.to_owned(),
        source,
    })?;

    if info.total_size >= 0 {
        file.set_len(info.total_size as u64)
            .map_err(|source| SetupError::Allocate {
                path: path.to_owned(),
                source,
            })?;
    }

    let sidecar = (resume_enabled && info.total_size >= 0).then(|| resume::sidecar_path(path));
    Ok(FileSink {
        file,
        sidecar,
        adopted,
    })
}

/// A running upload: the write end of the body pipe and the request task.
pub(crate) struct Upload {
    pub sender: mpsc::Sender<Bytes>,
    pub task: JoinHandle<Result<(), TransferError>>,
}

impl Upload {
    /// Closes the body and waits for the target's verdict.
    pub(crate) async fn finish(self) -> Result<(), TransferError> {
        drop(self.sender);
        match self.task.await {
            Ok(result) => result,
            Err(join) => Err(TransferError::TargetIo(std::io::Error::other(join))),
        }
    }
}

/// Starts the upload request, its body streaming from an in-process pipe.
///
/// The coordinator writes chunks into the pipe in strict file order; the
/// request task owns the HTTP side. `Content-Length` is set when the size is
/// known, and any non-2xx answer fails the transfer.
pub(crate) fn spawn_upload(
    client: &Client,
    url: &str,
    method: Method,
    headers: &[(String, String)],
    user_agent: &str,
    total_size: i64,
    dump: bool,
) -> Result<Upload, SetupError> {
    let parsed: url::Url = url
        .parse()
        .map_err(|source| SetupError::InvalidTargetUrl {
            url: url.to_owned(),
            source,
        })?;

    let (sender, receiver) = mpsc::channel::<Bytes>(1);
    let body = reqwest::Body::wrap_stream(
        ReceiverStream::new(receiver).map(Ok::<_, std::convert::Infallible>),
    );

    let mut builder = client
        .request(method, parsed)
        .header(header::USER_AGENT, user_agent)
        .header(header::CONTENT_TYPE, "application/octet-stream");
    if total_size >= 0 {
        builder = builder.header(header::CONTENT_LENGTH, total_size);
    }
    builder = client::apply_headers(builder, headers);

    let client = client.clone();
    let task = tokio::spawn(async move {
        let request = builder
            .body(body)
            .build()
            .map_err(TransferError::TargetRequest)?;
        if dump {
            client::dump_request(&request);
        }
        let response = client
            .execute(request)
            .await
            .map_err(TransferError::TargetRequest)?;
        if dump {
            client::dump_response(&response);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::TargetStatus(status.as_u16()));
        }
        Ok(())
    });

    Ok(Upload { sender, task })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_parse_by_shape() {
        assert_eq!(Target::parse(""), Target::Discard);
        assert_eq!(Target::parse("-"), Target::Stdout);
        assert_eq!(
            Target::parse("https://example.net/up"),
            Target::Upload("https://example.net/up".into())
        );
        assert_eq!(
            Target::parse("http-articles/out.bin"),
            Target::File(PathBuf::from("http-articles/out.bin"))
        );
    }

    #[test]
    fn positional_writes_land_at_their_offset() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.bin");
        let file = File::create(&path)?;
        file.set_len(10)?;

        let writer = FileWriter::new(file);
        writer.write_at(6, b"6789")?;
        writer.write_at(0, b"0123")?;
        writer.write_at(4, b"45")?;

        assert_eq!(std::fs::read(&path)?, b"0123456789");
        Ok(())
    }

    #[test]
    fn fresh_known_size_target_is_preallocated() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join("out.bin");
        let info = TransferInfo {
            total_size: 4096,
            last_modified: 0,
            etag: String::new(),
            supports_ranges: true,
        };

        let sink = open_file(&path, &info, true)?;
        assert_eq!(path.metadata()?.len(), 4096);
        assert!(sink.adopted.is_none());
        assert_eq!(sink.sidecar, Some(resume::sidecar_path(&path)));
        Ok(())
    }

    #[test]
    fn disabled_resume_clears_a_stale_sidecar() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![0u8; 100])?;
        let sidecar = resume::sidecar_path(&path);
        std::fs::write(&sidecar, "[[0,49,99]]")?;
        let info = TransferInfo {
            total_size: 100,
            last_modified: 0,
            etag: String::new(),
            supports_ranges: true,
        };

        let sink = open_file(&path, &info, false)?;
        assert!(!sidecar.exists());
        assert!(sink.adopted.is_none());
        assert!(sink.sidecar.is_none());
        Ok(())
    }

    #[test]
    fn valid_sidecar_is_adopted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![0u8; 100])?;
        std::fs::write(resume::sidecar_path(&path), "[[0,20,49],[50,60,99]]")?;
        let info = TransferInfo {
            total_size: 100,
            last_modified: 0,
            etag: String::new(),
            supports_ranges: true,
        };

        let sink = open_file(&path, &info, true)?;
        assert_eq!(sink.adopted, Some(vec![[0, 20, 49], [50, 60, 99]]));
        Ok(())
    }
}
