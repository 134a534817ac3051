//! Prompter that replays queued answers.

use std::collections::{BTreeSet, VecDeque};

use super::Prompter;
use crate::error::{Result, SetupError};

/// One queued answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    /// Take whatever default the question offers
    Default,
    Text(String),
    Secret(String),
    /// Zero-based option index
    Choice(usize),
    Choices(Vec<usize>),
    /// Behave like Esc/EOF
    Cancel,
}

impl Answer {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }

    pub fn secret(s: &str) -> Self {
        Self::Secret(s.to_string())
    }
}

/// Answers questions from a fixed queue. An exhausted queue cancels the run.
///
/// Text answers to choice questions are matched against option labels
/// (case-insensitive), so scripts can say `Answer::text("skip")`.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<Answer>,
    prompts: Vec<String>,
    notices: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Questions asked so far, in order.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    /// Messages shown so far, in order.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, prompt: &str) -> Result<Answer> {
        self.prompts.push(prompt.to_string());
        match self.answers.pop_front() {
            Some(Answer::Cancel) | None => Err(SetupError::Cancelled),
            Some(answer) => Ok(answer),
        }
    }
}

fn mismatch(answer: &Answer, question: &str) -> SetupError {
    SetupError::general(format!("scripted answer {:?} does not fit a {} question", answer, question))
}

fn label_index(options: &[String], label: &str) -> Option<usize> {
    options.iter().position(|o| o.eq_ignore_ascii_case(label))
}

impl Prompter for ScriptedPrompter {
    fn read_yes_no(&mut self, prompt: &str, default: bool) -> Result<bool> {
        match self.next(prompt)? {
            Answer::Yes => Ok(true),
            Answer::No => Ok(false),
            Answer::Default => Ok(default),
            other => Err(mismatch(&other, "yes/no")),
        }
    }

    fn read_text(&mut self, prompt: &str, default: &str) -> Result<String> {
        match self.next(prompt)? {
            Answer::Default => Ok(default.to_string()),
            Answer::Text(s) if s.is_empty() => Ok(default.to_string()),
            Answer::Text(s) => Ok(s),
            other => Err(mismatch(&other, "text")),
        }
    }

    fn read_secret(&mut self, prompt: &str) -> Result<String> {
        match self.next(prompt)? {
            Answer::Secret(s) | Answer::Text(s) => Ok(s),
            other => Err(mismatch(&other, "secret")),
        }
    }

    fn read_choice(&mut self, prompt: &str, options: &[String], default: usize) -> Result<Option<usize>> {
        match self.next(prompt)? {
            Answer::Default => Ok(Some(default)),
            Answer::Choice(i) => Ok(Some(i)),
            Answer::Text(label) => Ok(label_index(options, &label)),
            other => Err(mismatch(&other, "choice")),
        }
    }

    fn read_multi_choice(
        &mut self,
        prompt: &str,
        options: &[String],
        defaults: &BTreeSet<usize>,
    ) -> Result<Option<BTreeSet<usize>>> {
        match self.next(prompt)? {
            Answer::Default => Ok(Some(defaults.clone())),
            Answer::Choices(list) => Ok(Some(list.into_iter().collect())),
            Answer::Text(labels) if labels.trim().eq_ignore_ascii_case("none") => Ok(Some(BTreeSet::new())),
            Answer::Text(labels) => Ok(labels
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(|label| label_index(options, label))
                .collect()),
            other => Err(mismatch(&other, "multi-choice")),
        }
    }

    fn notice(&mut self, message: &str) -> Result<()> {
        log::debug!("notice: {}", message);
        self.notices.push(message.to_string());
        Ok(())
    }
}
