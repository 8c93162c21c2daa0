//! Command-line front end of the transfer engine.

mod cli;

pub use cli::Cli;
use fetch::TransferError;

/// Runs the transfer described by the command line and returns the process
/// exit code: 0 on success, 1 probe, 2 setup, 3 worker, 4 target, 5 file.
pub async fn run(cli: Cli) -> i32 {
    if cli.listen.is_some() {
        tracing::warn!("server mode is not part of this build, running as client");
    }

    let request = cli.into_request();
    let progress = request.progress;
    match fetch::transfer(request).await {
        Ok(()) => 0,
        Err(err) => {
            report_abort(&err, progress);
            err.exit_code()
        }
    }
}

/// One human line on stderr (clearing any progress rewrite in place), plus
/// the terminating JSON event when progress events are enabled.
fn report_abort(err: &TransferError, progress: bool) {
    eprintln!("\r{:55}\r{err} - aborting", "");
    if progress {
        let event = serde_json::json!({
            "event": "error",
            "message": err.to_string(),
        });
        println!("{event}");
    }
}
