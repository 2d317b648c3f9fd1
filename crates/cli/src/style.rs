//! Shared styling helpers for CLI output.

use console::Style;

/// Green check mark prefix.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red cross prefix.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Yellow warning prefix.
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// `+ email` in green.
pub fn added(msg: &str) -> String {
    Style::new().green().apply_to(format!("+ {msg}")).to_string()
}

/// `- email` in red.
pub fn removed(msg: &str) -> String {
    Style::new().red().apply_to(format!("- {msg}")).to_string()
}
