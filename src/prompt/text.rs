//! Line-oriented prompts over any reader/writer pair.

use std::collections::BTreeSet;
use std::io::{self, BufRead, IsTerminal, Write};

use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use super::Prompter;
use crate::error::{Result, SetupError};

/// Plain-text prompter. EOF on the reader cancels the run.
pub struct TextPrompter<R, W> {
    input: R,
    output: W,
    /// Disable terminal echo while reading secrets
    hide_secrets: bool,
}

impl TextPrompter<io::StdinLock<'static>, io::Stdout> {
    /// Prompter on the process's stdin/stdout.
    pub fn stdio() -> Self {
        let hide_secrets = io::stdin().is_terminal();
        Self {
            input: io::stdin().lock(),
            output: io::stdout(),
            hide_secrets,
        }
    }
}

impl<R: BufRead, W: Write> TextPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            hide_secrets: false,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_line(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            writeln!(self.output)?;
            return Err(SetupError::Cancelled);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn print_options(&mut self, options: &[String], marked: impl Fn(usize) -> bool) -> Result<()> {
        for (i, option) in options.iter().enumerate() {
            let mark = if marked(i) { "*" } else { " " };
            writeln!(self.output, " {} {:>2}) {}", mark, i + 1, option)?;
        }
        Ok(())
    }
}

/// Restores terminal echo when dropped.
struct EchoGuard {
    saved: Termios,
}

impl EchoGuard {
    fn disable() -> Option<Self> {
        let stdin = io::stdin();
        let saved = termios::tcgetattr(&stdin).ok()?;
        let mut quiet = saved.clone();
        quiet.local_flags.remove(LocalFlags::ECHO);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &quiet).ok()?;
        Some(Self { saved })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.saved);
    }
}

/// Parse "1 3,4" into zero-based indices.
fn parse_indices(answer: &str) -> Option<BTreeSet<usize>> {
    answer
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().ok()?.checked_sub(1))
        .collect()
}

impl<R: BufRead, W: Write> Prompter for TextPrompter<R, W> {
    fn read_yes_no(&mut self, prompt: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = self.read_line(&format!("{} {}: ", prompt, hint))?;
            match answer.trim().to_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer y or n.")?,
            }
        }
    }

    fn read_text(&mut self, prompt: &str, default: &str) -> Result<String> {
        let line = if default.is_empty() {
            format!("{}: ", prompt)
        } else {
            format!("{} [{}]: ", prompt, default)
        };
        let answer = self.read_line(&line)?;
        let answer = answer.trim();
        Ok(if answer.is_empty() { default } else { answer }.to_string())
    }

    fn read_secret(&mut self, prompt: &str) -> Result<String> {
        let _echo = if self.hide_secrets { EchoGuard::disable() } else { None };
        let answer = self.read_line(&format!("{}: ", prompt));
        if self.hide_secrets {
            writeln!(self.output)?;
        }
        answer
    }

    fn read_choice(&mut self, prompt: &str, options: &[String], default: usize) -> Result<Option<usize>> {
        writeln!(self.output, "{}", prompt)?;
        self.print_options(options, |i| i == default)?;
        let answer = self.read_line(&format!("Choice [{}]: ", default + 1))?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(Some(default));
        }
        Ok(answer.parse::<usize>().ok().and_then(|n| n.checked_sub(1)))
    }

    fn read_multi_choice(
        &mut self,
        prompt: &str,
        options: &[String],
        defaults: &BTreeSet<usize>,
    ) -> Result<Option<BTreeSet<usize>>> {
        writeln!(self.output, "{} (numbers separated by spaces, 'none' for nothing)", prompt)?;
        self.print_options(options, |i| defaults.contains(&i))?;
        let current: Vec<String> = defaults.iter().map(|i| (i + 1).to_string()).collect();
        let answer = self.read_line(&format!("Selection [{}]: ", current.join(" ")))?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(Some(defaults.clone()));
        }
        if answer.eq_ignore_ascii_case("none") {
            return Ok(Some(BTreeSet::new()));
        }
        Ok(parse_indices(answer))
    }

    fn notice(&mut self, message: &str) -> Result<()> {
        writeln!(self.output, "{}", message)?;
        Ok(())
    }
}
