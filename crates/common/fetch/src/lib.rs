//! Multi-connection HTTP transfer engine.
//!
//! This crate downloads a single remote resource over parallel byte-range
//! connections and reassembles it into one of four sinks:
//!
//! - a local file, written positionally and resumable across restarts
//!   through a hidden `.<name>.resume` sidecar,
//! - stdout, fed strictly in file order within a bounded memory budget,
//! - a second HTTP endpoint, streamed in order into a PUT or POST body,
//! - nowhere, counting bytes only.
//!
//! A transfer starts with a one-byte range probe to learn the resource size
//! and whether the origin honours `Range` requests; origins without range
//! support degrade the transfer to a single connection.
//!
//! # Usage
//!
//! ```no_run
//! use fetch::Target;
//! use fetch::TransferRequest;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fetch::TransferError> {
//!     let request = TransferRequest {
//!         url: "https://example.net/archive.bin".into(),
//!         target: Target::File("archive.bin".into()),
//!         concurrency: 6,
//!         max_memory: 384 << 20,
//!         timeout: Duration::from_secs(10),
//!         retries: 3,
//!         source_headers: Vec::new(),
//!         target_headers: Vec::new(),
//!         post: false,
//!         insecure: false,
//!         resume: true,
//!         verbose: false,
//!         dump: false,
//!         progress: false,
//!         user_agent: "fetch/1.3.0".into(),
//!     };
//!     fetch::transfer(request).await
//! }
//! ```

mod client;
mod content_range;
mod error;
mod format;
mod plan;
mod probe;
mod progress;
mod request;
mod resume;
mod sink;
mod transfer;

pub use crate::content_range::ContentRangeError;
pub use crate::error::RequestError;
pub use crate::error::SetupError;
pub use crate::error::SinkFault;
pub use crate::error::TransferError;
pub use crate::format::format_bandwidth;
pub use crate::format::format_duration;
pub use crate::format::format_size;
pub use crate::probe::TransferInfo;
pub use crate::sink::Target;
pub use crate::transfer::transfer;
pub use crate::transfer::TransferRequest;
