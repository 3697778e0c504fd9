//! Interactive input as a directed graph of steps.
//!
//! A step asks its questions through a [`Prompter`] and returns a
//! [`Transition`]. `Back` follows the step's explicit `back` edge; the first
//! step has none, and asking to go back there is refused with a message.
//! Steps only collect answers; nothing here touches the target.

pub mod steps;
pub mod terminal;

use crate::error::Result;

/// What the operator typed at one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Value(String),
    Back,
}

impl Answer {
    /// `back` in any case means go back; anything else is the value with
    /// the line terminator removed.
    pub fn from_input(raw: &str) -> Self {
        let value = raw.trim_end_matches(['\n', '\r']);
        if value.trim().eq_ignore_ascii_case("back") {
            Answer::Back
        } else {
            Answer::Value(value.to_string())
        }
    }
}

pub trait Prompter {
    fn ask(&mut self, prompt: &str) -> Result<Answer>;
    /// Like [`Prompter::ask`], without echoing the input.
    fn ask_secret(&mut self, prompt: &str) -> Result<Answer>;
    fn say(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next,
    Back,
    Repeat,
}

type StepFn<'a, S> = Box<dyn Fn(&mut dyn Prompter, &mut S) -> Result<Transition> + 'a>;

pub struct StepDef<'a, S> {
    pub title: String,
    /// Index of the step `Back` returns to.
    pub back: Option<usize>,
    pub run: StepFn<'a, S>,
}

impl<'a, S> StepDef<'a, S> {
    pub fn new(
        title: impl Into<String>,
        back: Option<usize>,
        run: impl Fn(&mut dyn Prompter, &mut S) -> Result<Transition> + 'a,
    ) -> Self {
        Self {
            title: title.into(),
            back,
            run: Box::new(run),
        }
    }
}

/// Walk `steps` until the last one returns `Next`.
pub fn run_steps<S>(steps: &[StepDef<'_, S>], prompter: &mut dyn Prompter, state: &mut S) -> Result<()> {
    let mut index = 0;
    while let Some(step) = steps.get(index) {
        prompter.say(&format!("\n--- {} ---", step.title));
        prompter.say("Type 'back' to return to the previous step.");
        match (step.run)(prompter, state)? {
            Transition::Next => index += 1,
            Transition::Repeat => {}
            Transition::Back => match step.back {
                Some(previous) => index = previous,
                None => prompter.say("Cannot go back from the first step."),
            },
        }
    }
    Ok(())
}

/// Ask until a non-empty value passes `validate`. `None` means back.
pub fn prompt_value(
    prompter: &mut dyn Prompter,
    prompt: &str,
    validate: impl Fn(&str) -> Result<()>,
) -> Result<Option<String>> {
    loop {
        match prompter.ask(prompt)? {
            Answer::Back => return Ok(None),
            Answer::Value(value) if value.is_empty() => prompter.say("Input cannot be empty."),
            Answer::Value(value) => match validate(&value) {
                Ok(()) => return Ok(Some(value)),
                Err(e) => prompter.say(&e.to_string()),
            },
        }
    }
}

/// Ask for a secret twice until both entries match and pass `validate`.
pub fn confirm_secret(
    prompter: &mut dyn Prompter,
    validate: impl Fn(&str) -> Result<()>,
) -> Result<Option<String>> {
    loop {
        let Answer::Value(first) = prompter.ask_secret("Enter password: ")? else {
            return Ok(None);
        };
        let Answer::Value(second) = prompter.ask_secret("Confirm password: ")? else {
            return Ok(None);
        };
        if first != second {
            prompter.say("Passwords do not match. Please try again.");
            continue;
        }
        match validate(&first) {
            Ok(()) => return Ok(Some(first)),
            Err(e) => prompter.say(&e.to_string()),
        }
    }
}

/// Numbered menu; returns the zero-based choice, `None` for back.
pub fn menu_select(
    prompter: &mut dyn Prompter,
    options: &[String],
    prompt: &str,
) -> Result<Option<usize>> {
    for (number, option) in options.iter().enumerate() {
        prompter.say(&format!("{}. {}", number + 1, option));
    }
    loop {
        let Answer::Value(choice) = prompter.ask(prompt)? else {
            return Ok(None);
        };
        match choice.trim().parse::<usize>() {
            Ok(n) if (1..=options.len()).contains(&n) => return Ok(Some(n - 1)),
            _ => prompter.say(&format!(
                "Please enter a number between 1 and {} or 'back' to return.",
                options.len()
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::{Answer, Prompter};
    use crate::error::{ProvisionError, Result};

    /// Replays canned answers and records everything shown.
    #[derive(Debug, Default)]
    pub struct ScriptedPrompter {
        answers: VecDeque<String>,
        pub prompts: Vec<String>,
        pub output: Vec<String>,
    }

    impl ScriptedPrompter {
        pub fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            }
        }

        pub fn remaining(&self) -> usize {
            self.answers.len()
        }

        fn next(&mut self, prompt: &str) -> Result<Answer> {
            self.prompts.push(prompt.to_string());
            let raw = self.answers.pop_front().ok_or(ProvisionError::Interrupted)?;
            Ok(Answer::from_input(&raw))
        }
    }

    impl Prompter for ScriptedPrompter {
        fn ask(&mut self, prompt: &str) -> Result<Answer> {
            self.next(prompt)
        }

        fn ask_secret(&mut self, prompt: &str) -> Result<Answer> {
            self.next(prompt)
        }

        fn say(&mut self, message: &str) {
            self.output.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedPrompter;
    use super::*;
    use crate::error::ProvisionError;

    #[test]
    fn test_answer_from_input() {
        assert_eq!(Answer::from_input("BACK\n"), Answer::Back);
        assert_eq!(Answer::from_input(" back "), Answer::Back);
        assert_eq!(
            Answer::from_input("backyard\r\n"),
            Answer::Value("backyard".to_string())
        );
        assert_eq!(Answer::from_input("\n"), Answer::Value(String::new()));
    }

    fn record<'a>(title: &str, back: Option<usize>) -> StepDef<'a, Vec<String>> {
        let name = title.to_string();
        StepDef::new(title, back, move |p: &mut dyn Prompter, seen: &mut Vec<String>| {
            match p.ask(&name)? {
                Answer::Back => Ok(Transition::Back),
                Answer::Value(v) => {
                    seen.push(format!("{}={}", name, v));
                    Ok(Transition::Next)
                }
            }
        })
    }

    #[test]
    fn test_back_follows_edges() {
        let steps = vec![record("a", None), record("b", Some(0)), record("c", Some(1))];
        let mut prompter = ScriptedPrompter::new(&["1", "2", "back", "back", "x", "y", "z"]);
        let mut seen = Vec::new();

        run_steps(&steps, &mut prompter, &mut seen).unwrap();

        assert_eq!(prompter.prompts, vec!["a", "b", "c", "b", "a", "b", "c"]);
        assert_eq!(seen.last().map(String::as_str), Some("c=z"));
    }

    #[test]
    fn test_back_from_first_step_is_refused() {
        let steps = vec![record("a", None)];
        let mut prompter = ScriptedPrompter::new(&["Back", "1"]);
        let mut seen = Vec::new();

        run_steps(&steps, &mut prompter, &mut seen).unwrap();

        assert!(prompter
            .output
            .contains(&"Cannot go back from the first step.".to_string()));
        assert_eq!(seen, vec!["a=1"]);
    }

    #[test]
    fn test_exhausted_input_is_interrupted() {
        let steps = vec![record("a", None)];
        let mut prompter = ScriptedPrompter::new(&[]);

        let err = run_steps(&steps, &mut prompter, &mut Vec::new()).unwrap_err();

        assert!(matches!(err, ProvisionError::Interrupted));
    }

    #[test]
    fn test_prompt_value_retries() {
        let mut prompter = ScriptedPrompter::new(&["", "bad", "good"]);

        let value = prompt_value(&mut prompter, "Value: ", |v| {
            if v == "bad" {
                Err(ProvisionError::validation("value", "no"))
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(value.as_deref(), Some("good"));
        assert_eq!(
            prompter.output,
            vec!["Input cannot be empty.", "invalid value: no"]
        );
    }

    #[test]
    fn test_confirm_secret_requires_match() {
        let mut prompter = ScriptedPrompter::new(&["one", "two", "same", "same"]);

        let secret = confirm_secret(&mut prompter, |_| Ok(())).unwrap();

        assert_eq!(secret.as_deref(), Some("same"));
        assert_eq!(
            prompter.output,
            vec!["Passwords do not match. Please try again."]
        );

        let mut prompter = ScriptedPrompter::new(&["secret", "back"]);
        assert_eq!(confirm_secret(&mut prompter, |_| Ok(())).unwrap(), None);
    }

    #[test]
    fn test_menu_select_range() {
        let options = vec!["UTC".to_string(), "Other".to_string()];
        let mut prompter = ScriptedPrompter::new(&["0", "3", "x", "2"]);

        let choice = menu_select(&mut prompter, &options, "Select an option: ").unwrap();

        assert_eq!(choice, Some(1));
        assert_eq!(prompter.output[..2], ["1. UTC", "2. Other"]);
        assert_eq!(prompter.output.len(), 5);
    }
}
