//! Git output parsing helpers.

use std::process::Output;

/// Formats a git error with both stdout and stderr.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// First line of stdout, trimmed.
pub fn first_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Whether `git pull` reported nothing new.
pub fn is_up_to_date(output: &Output) -> bool {
    let text = String::from_utf8_lossy(&output.stdout);
    text.contains("Already up to date") || text.contains("Already up-to-date")
}
