//! Terminal output helpers: colored status lines and elapsed-time formatting.

use std::time::Duration;

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const PROMPT: &str = "$";
}

/// Elapsed time rounded to whole seconds (`"2m 5s"`); sub-second runs print in ms.
pub fn format_elapsed(elapsed: Duration) -> String {
  let rounded = if elapsed.as_secs() > 0 {
    Duration::from_secs(elapsed.as_secs())
  } else {
    Duration::from_millis(elapsed.as_millis() as u64)
  };
  humantime::format_duration(rounded).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// A shell command the user is expected to run next.
pub fn print_command(command: &str) {
  println!(
    "   {} {}",
    symbols::PROMPT.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    command.if_supports_color(Stream::Stdout, |s| s.cyan())
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_elapsed() {
    assert_eq!(format_elapsed(Duration::from_millis(50)), "50ms");
    assert_eq!(format_elapsed(Duration::from_millis(1500)), "1s");
    assert_eq!(format_elapsed(Duration::from_millis(65_400)), "1m 5s");
  }
}
