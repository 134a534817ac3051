//! Interactive prompting
//!
//! Steps ask questions through the `Prompter` trait and never know which
//! backend answers them:
//!
//! - `TextPrompter` - line-oriented, works over any `BufRead`/`Write`
//! - `DialogPrompter` - ratatui dialog boxes on a capable terminal
//! - `ScriptedPrompter` - queued answers for tests and unattended runs
//!
//! The backend is picked once at startup by `select_prompter`.
//!
//! Backends implement the `read_*` primitives, which return whatever the user
//! entered. The `ask_*` methods layer defaults, validation and re-prompting on
//! top via `prompt_until`. Cancelling (Esc, EOF, Ctrl+C) is always
//! `SetupError::Cancelled`, never the default answer.

mod dialog;
mod scripted;
mod text;

pub use dialog::{
    ChecklistState, ConfirmState, CrosstermKeys, DialogPrompter, Flow, InputState, KeySource,
    MenuState,
};
pub use scripted::{Answer, ScriptedPrompter};
pub use text::TextPrompter;

use std::collections::BTreeSet;
use std::fmt::Display;
use std::io::IsTerminal;

use strum::IntoEnumIterator;

use crate::error::Result;
use crate::settings::UiPreference;

/// Validation callback: `Err(message)` is shown to the user before re-prompting.
pub type Validator<'a> = &'a dyn Fn(&str) -> std::result::Result<(), String>;

/// Accept any input.
pub fn any_input(_: &str) -> std::result::Result<(), String> {
    Ok(())
}

/// Question-asking capability shared by all backends.
pub trait Prompter {
    /// Yes/no question; an empty answer takes `default`.
    fn read_yes_no(&mut self, prompt: &str, default: bool) -> Result<bool>;

    /// One line of text; an empty answer takes `default`.
    fn read_text(&mut self, prompt: &str, default: &str) -> Result<String>;

    /// One line of text without echo.
    fn read_secret(&mut self, prompt: &str) -> Result<String>;

    /// Pick one option. `None` means the answer could not be understood.
    fn read_choice(&mut self, prompt: &str, options: &[String], default: usize) -> Result<Option<usize>>;

    /// Pick any number of options. `None` means the answer could not be understood.
    fn read_multi_choice(
        &mut self,
        prompt: &str,
        options: &[String],
        defaults: &BTreeSet<usize>,
    ) -> Result<Option<BTreeSet<usize>>>;

    /// Show a message (validation errors, warnings before destructive steps).
    fn notice(&mut self, message: &str) -> Result<()>;

    fn ask_yes_no(&mut self, prompt: &str, default: bool) -> Result<bool> {
        self.read_yes_no(prompt, default)
    }

    /// Text that must satisfy `validator`; re-prompts until it does.
    fn ask_text(&mut self, prompt: &str, default: &str, validator: Validator<'_>) -> Result<String> {
        prompt_until(self, |p| p.read_text(prompt, default), |v: &String| validator(v.as_str()))
    }

    /// A password entered twice. Empty or mismatched pairs are rejected and
    /// the user is asked again.
    fn ask_secret(&mut self, prompt: &str) -> Result<String> {
        let confirm = format!("{} (again)", prompt);
        let (first, _) = prompt_until(
            self,
            |p| Ok((p.read_secret(prompt)?, p.read_secret(&confirm)?)),
            |(first, second): &(String, String)| {
                if first.is_empty() {
                    Err("Password cannot be empty".to_string())
                } else if first != second {
                    Err("Passwords do not match, try again".to_string())
                } else {
                    Ok(())
                }
            },
        )?;
        Ok(first)
    }

    /// Index into `options`; re-prompts on out-of-range or unparseable input.
    fn ask_choice(&mut self, prompt: &str, options: &[String], default: usize) -> Result<usize> {
        let picked = prompt_until(
            self,
            |p| p.read_choice(prompt, options, default),
            |choice: &Option<usize>| match choice {
                Some(i) if *i < options.len() => Ok(()),
                _ => Err(format!("Pick a number between 1 and {}", options.len())),
            },
        )?;
        Ok(picked.unwrap_or(default))
    }

    /// Set of indices into `options`.
    fn ask_multi_choice(
        &mut self,
        prompt: &str,
        options: &[String],
        defaults: &BTreeSet<usize>,
    ) -> Result<BTreeSet<usize>> {
        let picked = prompt_until(
            self,
            |p| p.read_multi_choice(prompt, options, defaults),
            |choice: &Option<BTreeSet<usize>>| match choice {
                Some(set) if set.iter().all(|i| *i < options.len()) => Ok(()),
                _ => Err(format!(
                    "Enter numbers between 1 and {} separated by spaces, or 'none'",
                    options.len()
                )),
            },
        )?;
        Ok(picked.unwrap_or_default())
    }
}

/// Ask with `ask` until `check` accepts the answer, showing each rejection.
pub fn prompt_until<P, T, A, C>(prompter: &mut P, mut ask: A, check: C) -> Result<T>
where
    P: Prompter + ?Sized,
    A: FnMut(&mut P) -> Result<T>,
    C: Fn(&T) -> std::result::Result<(), String>,
{
    loop {
        let answer = ask(prompter)?;
        match check(&answer) {
            Ok(()) => return Ok(answer),
            Err(message) => {
                log::debug!("Rejected input: {}", message);
                prompter.notice(&message)?;
            }
        }
    }
}

/// Pick one variant of a strum enum.
pub fn choose<T, P>(prompter: &mut P, prompt: &str, default: T) -> Result<T>
where
    T: IntoEnumIterator + Display + PartialEq + Copy,
    P: Prompter + ?Sized,
{
    let variants: Vec<T> = T::iter().collect();
    let labels: Vec<String> = variants.iter().map(ToString::to_string).collect();
    let default_idx = variants.iter().position(|v| *v == default).unwrap_or(0);
    let idx = prompter.ask_choice(prompt, &labels, default_idx)?;
    Ok(variants[idx])
}

/// Pick any subset of a strum enum's variants.
pub fn choose_many<T, P>(prompter: &mut P, prompt: &str, defaults: &BTreeSet<T>) -> Result<BTreeSet<T>>
where
    T: IntoEnumIterator + Display + Ord + Copy,
    P: Prompter + ?Sized,
{
    let variants: Vec<T> = T::iter().collect();
    let labels: Vec<String> = variants.iter().map(ToString::to_string).collect();
    let default_idx: BTreeSet<usize> = variants
        .iter()
        .enumerate()
        .filter(|(_, v)| defaults.contains(v))
        .map(|(i, _)| i)
        .collect();
    let picked = prompter.ask_multi_choice(prompt, &labels, &default_idx)?;
    Ok(picked.into_iter().map(|i| variants[i]).collect())
}

/// Whether the dialog backend should be used.
pub fn use_dialog(
    preference: UiPreference,
    force_text: bool,
    stdin_tty: bool,
    stdout_tty: bool,
    term: Option<&str>,
) -> bool {
    if force_text {
        return false;
    }
    let capable = stdin_tty && stdout_tty && term.is_some_and(|t| !t.is_empty() && t != "dumb");
    match preference {
        UiPreference::Text => false,
        UiPreference::Dialog | UiPreference::Auto => capable,
    }
}

/// Pick the prompt backend for this process.
pub fn select_prompter(preference: UiPreference, force_text: bool) -> Box<dyn Prompter> {
    let term = std::env::var("TERM").ok();
    let dialog = use_dialog(
        preference,
        force_text,
        std::io::stdin().is_terminal(),
        std::io::stdout().is_terminal(),
        term.as_deref(),
    );
    if preference == UiPreference::Dialog && !dialog {
        log::warn!("Dialog UI requested but the terminal cannot show it, using text prompts");
    }

    if dialog {
        match DialogPrompter::stdout() {
            Ok(prompter) => {
                log::info!("Using dialog prompts");
                return Box::new(prompter);
            }
            Err(e) => log::warn!("Dialog UI unavailable ({}), using text prompts", e),
        }
    }
    log::info!("Using text prompts");
    Box::new(TextPrompter::stdio())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SetupError;
    use crate::types::Desktop;

    #[test]
    fn test_use_dialog_requires_capable_terminal() {
        assert!(use_dialog(UiPreference::Auto, false, true, true, Some("xterm-256color")));
        assert!(!use_dialog(UiPreference::Auto, false, true, true, Some("dumb")));
        assert!(!use_dialog(UiPreference::Auto, false, true, true, None));
        assert!(!use_dialog(UiPreference::Auto, false, false, true, Some("xterm")));
        assert!(!use_dialog(UiPreference::Dialog, false, true, false, Some("xterm")));
    }

    #[test]
    fn test_text_overrides_win() {
        assert!(!use_dialog(UiPreference::Auto, true, true, true, Some("xterm")));
        assert!(!use_dialog(UiPreference::Text, false, true, true, Some("xterm")));
    }

    #[test]
    fn test_prompt_until_reprompts_with_notice() {
        let mut p = ScriptedPrompter::new([Answer::text("bad name"), Answer::text("good")]);
        let value = p
            .ask_text("Hostname", "archgamer", &crate::config::validate_hostname)
            .unwrap();
        assert_eq!(value, "good");
        assert_eq!(p.notices().len(), 1);
    }

    #[test]
    fn test_ask_text_default() {
        let mut p = ScriptedPrompter::new([Answer::Default]);
        assert_eq!(p.ask_text("Hostname", "archgamer", &any_input).unwrap(), "archgamer");
    }

    #[test]
    fn test_secret_mismatch_reprompts() {
        let mut p = ScriptedPrompter::new([
            Answer::secret("one"),
            Answer::secret("two"),
            Answer::secret("same"),
            Answer::secret("same"),
        ]);
        assert_eq!(p.ask_secret("Password").unwrap(), "same");
        assert_eq!(p.notices(), ["Passwords do not match, try again"]);
    }

    #[test]
    fn test_secret_mismatch_never_accepted() {
        let mut p = ScriptedPrompter::new([Answer::secret("one"), Answer::secret("two")]);
        assert!(matches!(p.ask_secret("Password"), Err(SetupError::Cancelled)));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let mut p = ScriptedPrompter::new([
            Answer::secret(""),
            Answer::secret(""),
            Answer::secret("pw"),
            Answer::secret("pw"),
        ]);
        assert_eq!(p.ask_secret("Password").unwrap(), "pw");
        assert_eq!(p.notices(), ["Password cannot be empty"]);
    }

    #[test]
    fn test_choice_out_of_range_reprompts() {
        let options = vec!["a".to_string(), "b".to_string()];
        let mut p = ScriptedPrompter::new([Answer::Choice(5), Answer::Choice(1)]);
        assert_eq!(p.ask_choice("Pick", &options, 0).unwrap(), 1);
        assert_eq!(p.notices().len(), 1);
    }

    #[test]
    fn test_choose_enum() {
        let mut p = ScriptedPrompter::new([Answer::Default, Answer::text("skip")]);
        assert_eq!(choose(&mut p, "Desktop", Desktop::Gnome).unwrap(), Desktop::Gnome);
        assert_eq!(choose(&mut p, "Desktop", Desktop::Kde).unwrap(), Desktop::Skip);
    }

    #[test]
    fn test_choose_many_enum() {
        use crate::types::GamingComponent as G;
        let defaults: BTreeSet<G> = [G::Steam].into_iter().collect();
        let mut p = ScriptedPrompter::new([Answer::Default, Answer::text("lutris wine")]);
        assert_eq!(choose_many(&mut p, "Components", &defaults).unwrap(), defaults);
        let picked = choose_many(&mut p, "Components", &defaults).unwrap();
        assert_eq!(picked, [G::Lutris, G::Wine].into_iter().collect());
    }
}
