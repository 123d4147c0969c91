mod backup;
mod db;
mod ipc;
mod policy;
mod rubric;
mod telemetry;

use std::io::{self, BufRead, Write};

fn main() {
    // Logging goes to stderr; stdout carries exactly one JSON response per line.
    if let Err(e) = telemetry::init() {
        eprintln!("counseld: telemetry init failed: {e}");
    }

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "counseld ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply with an id we never parsed; report and move on.
                tracing::warn!(error = %e, "rejected unparseable request line");
                let _ = writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    tracing::info!("stdin closed, shutting down");
}
