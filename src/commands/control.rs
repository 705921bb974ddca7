use std::io::BufRead;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::scheduler::MonitorHandle;
use crate::utils::{parse_rfc3339, AppError, AppResult, Clock};

/// Operator request to a running service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Record a successful check-in, at the given time or now.
    Success(Option<DateTime<Utc>>),
    /// Evaluate immediately.
    Check,
}

/// Parse one control line. Blank lines and `#` comments yield `None`.
pub fn parse_control_line(line: &str) -> AppResult<Option<ControlCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    match verb {
        "success" | "set-last-success" => {
            let at = if rest.is_empty() {
                None
            } else {
                Some(parse_rfc3339(rest)?)
            };
            Ok(Some(ControlCommand::Success(at)))
        }
        "check" if rest.is_empty() => Ok(Some(ControlCommand::Check)),
        _ => Err(AppError::Custom(format!("unknown control command '{}'", line))),
    }
}

pub fn apply_control_line(handle: &MonitorHandle, clock: &dyn Clock, line: &str) -> AppResult<()> {
    match parse_control_line(line)? {
        Some(ControlCommand::Success(at)) => {
            let ts = at.unwrap_or_else(|| clock.now());
            log::info!("Control: last successful send set to {}", ts);
            handle.update_last_success(ts);
        }
        Some(ControlCommand::Check) => handle.re_evaluate(),
        None => {}
    }
    Ok(())
}

/// Forward stdin lines from a dedicated thread. The channel closes at EOF.
pub fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("pos-agent-control".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Control input unavailable: {}", e);
    }
    rx
}
