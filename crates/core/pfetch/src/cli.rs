use fetch::Target;
use fetch::TransferRequest;
use std::time::Duration;

const MIB: i64 = 1 << 20;

#[derive(Debug, clap::Parser)]
#[clap(
    name = clap::crate_name!(),
    version = clap::crate_version!(),
    about = clap::crate_description!()
)]
pub struct Cli {
    /// Source URL to fetch
    pub source_url: String,

    /// Destination: `-` for stdout, an http(s) URL for upload, a local path
    /// otherwise; omit to discard the bytes after counting them
    #[clap(default_value = "")]
    pub destination: String,

    /// Transfer concurrency level, clamped to [1, 32]
    #[clap(long, default_value_t = 6)]
    pub concurrency: usize,

    /// Maximum memory used for in-order reassembly, in bytes
    #[clap(long, default_value_t = 384 * MIB)]
    pub maxmem: i64,

    /// Request timeout in seconds, clamped to [1, 30]
    #[clap(long, default_value_t = 10)]
    pub timeout: u64,

    /// Retries per worker on transient failures, capped at 4
    #[clap(long, default_value_t = 3)]
    pub retries: u32,

    /// Add a header to source requests, as "Name: Value" (repeatable);
    /// a Host header rewrites the virtual host
    #[clap(long = "source", value_name = "HEADER", value_parser = parse_header)]
    pub source_headers: Vec<(String, String)>,

    /// Add a header to the upload request, as "Name: Value" (repeatable)
    #[clap(long = "target", value_name = "HEADER", value_parser = parse_header)]
    pub target_headers: Vec<(String, String)>,

    /// Upload with HTTP POST instead of PUT
    #[clap(long)]
    pub post: bool,

    /// Ignore remote TLS certificate errors
    #[clap(long)]
    pub insecure: bool,

    /// Disable transfer auto-resuming
    #[clap(long)]
    pub noresume: bool,

    /// Report transfer progress on stderr
    #[clap(long)]
    pub verbose: bool,

    /// Dump HTTP request and response heads on stderr
    #[clap(long)]
    pub dump: bool,

    /// Emit transfer progress as JSON events on stdout
    #[clap(long)]
    pub progress: bool,

    /// Listening address & port in server mode (not part of this build)
    #[clap(long)]
    pub listen: Option<String>,

    /// TLS certificate & key in server mode (not part of this build)
    #[clap(long)]
    pub certificate: Option<String>,

    /// Security password in server mode (not part of this build)
    #[clap(long)]
    pub password: Option<String>,
}

fn parse_header(value: &str) -> Result<(String, String), String> {
    let (name, content) = value
        .split_once(':')
        .ok_or_else(|| format!("no colon in header {value:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {value:?}"));
    }
    Ok((name.to_owned(), content.trim().to_owned()))
}

impl Cli {
    /// Applies the option clamps and turns the command line into a transfer.
    pub fn into_request(self) -> TransferRequest {
        let concurrency = self.concurrency.clamp(1, 32);
        let floor = concurrency as i64 * 8 * MIB;
        let maxmem = self.maxmem.max(floor);
        let concurrency_i64 = concurrency as i64;
        let maxmem = ((maxmem + concurrency_i64 - 1) / concurrency_i64) * concurrency_i64;
        let target = Target::parse(&self.destination);
        // stdout carries the payload, JSON events would corrupt it
        let progress = self.progress && target != Target::Stdout;

        TransferRequest {
            url: self.source_url,
            target,
            concurrency,
            max_memory: maxmem,
            timeout: Duration::from_secs(self.timeout.clamp(1, 30)),
            retries: self.retries.min(4),
            source_headers: self.source_headers,
            target_headers: self.target_headers,
            post: self.post,
            insecure: self.insecure,
            resume: !self.noresume,
            verbose: self.verbose,
            dump: self.dump,
            progress,
            user_agent: format!("{}/{}", clap::crate_name!(), clap::crate_version!()),
        }
    }
}
