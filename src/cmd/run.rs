//! Run submission and live event watching, `dockbridge run` / `dockbridge watch`.

use anyhow::{Context, Result};
use console::style;
use dockbridge::connection::{ConnectionState, ConnectionStatus};
use dockbridge::protocol::{ExecuteRequest, ExecuteResponse, JointState};
use dockbridge::{BridgeConfig, Session, SessionEvent};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Extra time allowed on top of the connect timeout before giving up.
const CONNECT_GRACE: Duration = Duration::from_secs(1);

pub async fn cmd_run(
    config: &BridgeConfig,
    file: &Path,
    stdin: Option<&str>,
    tests: Option<&Path>,
    wait_secs: u64,
) -> Result<()> {
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut request = ExecuteRequest::new(code).with_stdin(stdin.unwrap_or_default());
    if let Some(tests) = tests {
        let source = std::fs::read_to_string(tests)
            .with_context(|| format!("Failed to read {}", tests.display()))?;
        request = request.with_tests(source);
    }

    let session = Session::connect(config)?;
    let mut events = session.subscribe();

    if !session
        .wait_connected(config.connect_timeout() + CONNECT_GRACE)
        .await
    {
        drain(&mut events);
        session.shutdown().await;
        anyhow::bail!("Could not connect to {}", session.endpoints().ws_url);
    }

    let submit = session.submit(request);
    tokio::pin!(submit);
    let mut finished = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut submit => break outcome,
            event = events.recv() => {
                if let Ok(event) = event {
                    finished |= print_event(&event);
                }
            }
        }
    };

    // Trailing lifecycle events may still be in flight when the service answers.
    if outcome.is_ok() && !finished {
        let trailing = async {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if print_event(&event) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event printer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(wait_secs), trailing).await;
    }
    drain(&mut events);

    let joints = session.telemetry().await;
    session.shutdown().await;

    print_joints(&joints);
    let response = outcome.context("Run failed")?;
    print_summary(&response);
    if !response.success {
        anyhow::bail!(
            "Run failed: {}",
            response.error.as_deref().unwrap_or("non-zero exit")
        );
    }
    Ok(())
}

pub async fn cmd_watch(config: &BridgeConfig, duration: Option<u64>, ack: bool) -> Result<()> {
    let session = Session::connect(config)?;
    let mut events = session.subscribe();
    println!(
        "Watching {} (Ctrl-C to stop)",
        style(&session.endpoints().ws_url).bold()
    );

    let watch = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Telemetry(joints)) if ack => {
                    session.acknowledge(&joints).await;
                }
                Ok(event) => {
                    print_event(&event);
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    };

    let limit = duration.map(Duration::from_secs).unwrap_or(Duration::MAX);
    tokio::select! {
        _ = watch => {}
        _ = tokio::time::sleep(limit) => {}
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
    }

    session.shutdown().await;
    print_joints(&session.telemetry().await);
    Ok(())
}

/// Print one session event. Returns true when it marks the end of a run.
fn print_event(event: &SessionEvent) -> bool {
    match event {
        SessionEvent::Log(entry) => {
            println!("{}", super::render_entry(entry));
            false
        }
        SessionEvent::Status(state) => {
            eprintln!("{}", style(describe_status(state)).dim());
            false
        }
        SessionEvent::RunEnded => true,
        SessionEvent::Running(_) | SessionEvent::Telemetry(_) | SessionEvent::LogsCleared => false,
    }
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

fn describe_status(state: &ConnectionState) -> String {
    match (state.status, state.retry_in) {
        (ConnectionStatus::Error, Some(delay)) => format!(
            "connection: error (retry {}/{} in {}s)",
            state.attempts,
            state.max_attempts,
            delay.as_secs_f64()
        ),
        (ConnectionStatus::Error, None) if state.exhausted => {
            "connection: error (retries exhausted)".to_string()
        }
        (status, _) => format!("connection: {}", status),
    }
}

fn print_joints(joints: &JointState) {
    if joints.is_empty() {
        return;
    }
    println!();
    println!("{}", style("Final joint state").bold());
    let width = joints.keys().map(String::len).max().unwrap_or(0);
    for (name, value) in joints {
        println!("  {:<width$}  {:>10.4}", name, value, width = width);
    }
}

fn print_summary(response: &ExecuteResponse) {
    println!();
    if response.success {
        println!("{}", style("✓ Run succeeded").green());
    } else {
        println!("{}", style("✗ Run failed").red());
    }
    if let Some(code) = response.exit_code {
        println!("  exit code: {}", code);
    }
    if !response.tests.is_empty() {
        let failed = response.failed_tests();
        println!(
            "  tests: {} passed, {} failed",
            response.tests.len() - failed,
            failed
        );
        for test in &response.tests {
            let marker = if test.status == "passed" {
                style("✓").green()
            } else {
                style("✗").red()
            };
            println!("    {} {} ({}ms)", marker, test.name, test.duration_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_status() {
        let mut state = ConnectionState::disconnected(5);
        assert_eq!(describe_status(&state), "connection: disconnected");

        state.status = ConnectionStatus::Error;
        state.attempts = 2;
        state.retry_in = Some(Duration::from_secs(4));
        assert_eq!(describe_status(&state), "connection: error (retry 2/5 in 4s)");

        state.retry_in = None;
        state.exhausted = true;
        assert_eq!(describe_status(&state), "connection: error (retries exhausted)");
    }

    #[test]
    fn test_run_ended_ends_run() {
        assert!(print_event(&SessionEvent::RunEnded));
        // The service reply can clear the flag before the completion log lands.
        assert!(!print_event(&SessionEvent::Running(false)));
        assert!(!print_event(&SessionEvent::Running(true)));
        assert!(!print_event(&SessionEvent::LogsCleared));
    }
}
