use crate::error::SetupError;
use reqwest::Client;
use reqwest::RequestBuilder;
use std::time::Duration;

/// Idle connections kept per host; also the hard ceiling on workers.
const POOL_SIZE: usize = 32;

/// Builds the shared HTTP client used for the probe, every range request and
/// the upload.
///
/// One configured duration bounds connecting (TCP + TLS) and the silence
/// between two reads of a response body; the read timeout resets on every
/// received buffer, so a slow but live transfer never trips it.
pub(crate) fn build(
    user_agent: &str,
    timeout: Duration,
    insecure: bool,
) -> Result<Client, SetupError> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .pool_max_idle_per_host(POOL_SIZE)
        .build()
        .map_err(SetupError::Client)
}

/// Applies user-supplied `Name: Value` pairs to a request.
///
/// A `Host` pair rewrites the virtual host of the request; a `User-Agent`
/// pair overrides the program default.
pub(crate) fn apply_headers(
    mut builder: RequestBuilder,
    headers: &[(String, String)],
) -> RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

/// Writes the head of an outgoing request to stderr, curl-style.
pub(crate) fn dump_request(request: &reqwest::Request) {
    eprintln!("> {} {}", request.method(), request.url());
    for (name, value) in request.headers() {
        eprintln!("> {}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    eprintln!(">");
}

/// Writes the head of a received response to stderr.
pub(crate) fn dump_response(response: &reqwest::Response) {
    eprintln!("< {:?} {}", response.version(), response.status());
    for (name, value) in response.headers() {
        eprintln!("< {}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    eprintln!("<");
}
