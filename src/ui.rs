use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// enable `debug!` output
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! debug {
    // format string literal (with or without inline formatting)
    ($fmt:literal $(, $($arg:tt)*)?) => {{
        if $crate::ui::verbose() {
            use colored::Colorize;
            use std::io::{self, Write};
            let _ = writeln!(io::stderr(), "{}", format!($fmt $(, $($arg)*)?).dimmed());
        }
    }};
}

#[macro_export]
macro_rules! warning {
    // format string literal (with or without inline formatting)
    ($fmt:literal $(, $($arg:tt)*)?) => {{
        use colored::Colorize;
        use std::io::{self, Write};
        let _ = writeln!(io::stderr(), "{}", format!($fmt $(, $($arg)*)?).yellow());
    }};
    // arbitrary expression (non-literal)
    ($expr:expr) => {{
        use colored::Colorize;
        use std::io::{self, Write};
        let _ = writeln!(io::stderr(), "{}", format!("{}", $expr).yellow());
    }};
}

#[macro_export]
macro_rules! error {
    // format string literal (with or without inline formatting)
    ($fmt:literal $(, $($arg:tt)*)?) => {{
        use colored::Colorize;
        use std::io::{self, Write};
        let _ = writeln!(io::stderr(), "{}", format!($fmt $(, $($arg)*)?).red());
    }};
    // arbitrary expression (non-literal)
    ($expr:expr) => {{
        use colored::Colorize;
        use std::io::{self, Write};
        let _ = writeln!(io::stderr(), "{}", format!("{}", $expr).red());
    }};
}

#[macro_export]
macro_rules! status {
    // format string literal (with or without inline formatting)
    ($fmt:literal $(, $($arg:tt)*)?) => {{
        use colored::Colorize;
        use std::io::{self, Write};
        let _ = writeln!(io::stdout(), "{}", format!($fmt $(, $($arg)*)?).green());
    }};
}

#[macro_export]
macro_rules! info {
    () => {{
        use std::io::{self, Write};
        let _ = writeln!(io::stdout());
    }};
    // format string literal (with or without inline formatting or args)
    ($fmt:literal $(, $($arg:tt)*)?) => {{
        use std::io::{self, Write};
        let _ = writeln!(io::stdout(), $fmt $(, $($arg)*)?);
    }};
}

/// run `f` behind a spinner when stdout is a terminal
pub fn with_spinner<T>(f: impl FnOnce() -> T) -> T {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::io::IsTerminal;

    if !std::io::stdout().is_terminal() {
        return f();
    }

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("waiting for tf...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let result = f();

    spinner.finish_and_clear();
    result
}

/// single-key prompt like "[Y]ES/[n]o"; enter picks the first option
///
/// returns the lowercased first character of the chosen option, or `None` on esc/ctrl-c
pub fn prompt(options: &[&str]) -> Result<Option<char>> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
        terminal::{disable_raw_mode, enable_raw_mode},
    };
    use std::io::{self, Write};

    debug_assert!(!options.is_empty(), "prompt requires at least one option");

    let first_char = |opt: &str| opt.chars().next().unwrap_or('?');

    // build prompt string like "[Y]ES/[n]o"
    let prompt_parts: Vec<String> = options
        .iter()
        .map(|opt| {
            let first = first_char(opt);
            format!("[{first}]{}", &opt[first.len_utf8().min(opt.len())..])
        })
        .collect();
    let valid_chars: Vec<char> = options
        .iter()
        .map(|opt| first_char(opt).to_ascii_lowercase())
        .collect();

    print!("{} ? ", prompt_parts.join("/"));
    let _ = io::stdout().flush();

    enable_raw_mode().context("this command requires an interactive terminal")?;

    let chosen = loop {
        let Ok(Event::Key(KeyEvent {
            code, modifiers, ..
        })) = event::read()
        else {
            continue;
        };
        match code {
            KeyCode::Esc => break None,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => break None,
            KeyCode::Enter => break Some(0),
            KeyCode::Char(c) => {
                let lower = c.to_ascii_lowercase();
                if let Some(idx) = valid_chars.iter().position(|&ch| ch == lower) {
                    break Some(idx);
                }
            }
            _ => {}
        }
    };

    disable_raw_mode().ok();
    match chosen {
        Some(idx) => {
            info!("{}", options[idx]);
            Ok(Some(valid_chars[idx]))
        }
        None => {
            info!("^C");
            Ok(None)
        }
    }
}

/// edit one line in place; `None` if the user cancelled
pub fn edit_one_line(line: &str) -> Result<Option<String>> {
    use rustyline::DefaultEditor;

    let mut editor = DefaultEditor::new().context("failed to initialise line editor")?;
    match editor.readline_with_initial("? ", (line, "")) {
        Ok(edited) => Ok(Some(edited.trim().to_string())),
        Err(_) => {
            info!("^C");
            Ok(None)
        }
    }
}

/// edit text in `$EDITOR`; `None` if the editor failed or left the file empty
pub fn edit_multi_line(text: &str) -> Result<Option<String>> {
    use std::env;
    use std::fs;
    use std::io::Write;
    use std::process::Command;
    use tempfile::Builder;

    let editor = env::var("EDITOR").context("EDITOR not set")?;

    let mut temp_file = Builder::new()
        .prefix("tfvc-checkin-")
        .suffix(".txt")
        .tempfile()
        .context("failed to create temporary file")?;
    temp_file
        .write_all(text.as_bytes())
        .context("failed to write to temporary file")?;
    temp_file
        .flush()
        .context("failed to flush temporary file")?;
    let temp_path = temp_file.path().to_owned();

    // run the editor via shell to properly handle arguments in EDITOR
    let quoted = shlex::try_quote(&temp_path.to_string_lossy())
        .context("temporary path cannot be quoted")?
        .into_owned();
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{editor} {quoted}"))
        .status()
        .with_context(|| format!("failed to run editor: {editor}"))?;
    if !status.success() {
        return Ok(None);
    }

    let edited = fs::read_to_string(&temp_path)
        .context("failed to read back edited comment")?
        .trim()
        .to_string();
    Ok((!edited.is_empty()).then_some(edited))
}
