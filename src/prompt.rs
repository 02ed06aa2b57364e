//! Interactive pause/step prompts.
//!
//! A prompt is disabled by default and armed by a runtime flag. When armed
//! it offers the operator a chance to inspect state before the run
//! continues: `q`/`quit` (or end-of-input) aborts the remaining run,
//! `y`/`yes` disarms the prompt for the rest of the run, anything else
//! proceeds to the next stop.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

const PROMPT_SUFFIX: &str = "; continue? [y/(n)] ";

/// What the operator chose at a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Proceed,
    /// Abort the remaining run.
    Quit,
}

/// A named, armable prompt with run-wide interior state.
#[derive(Debug, Default)]
pub struct Prompt {
    label: &'static str,
    armed: AtomicBool,
}

impl Prompt {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            armed: AtomicBool::new(false),
        }
    }

    /// Arm the prompt so subsequent [`Prompt::prompt`] calls stop.
    pub fn set(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Stop at the terminal if armed; a disarmed prompt proceeds silently.
    pub fn prompt(&self, msg: &str) -> io::Result<PromptOutcome> {
        self.prompt_with(msg, &mut io::stdin().lock(), &mut io::stdout())
    }

    /// Same as [`Prompt::prompt`] with explicit streams.
    pub fn prompt_with<R, W>(&self, msg: &str, input: &mut R, out: &mut W) -> io::Result<PromptOutcome>
    where
        R: BufRead,
        W: Write,
    {
        if !self.is_set() {
            return Ok(PromptOutcome::Proceed);
        }
        write!(out, "{msg}; {}{PROMPT_SUFFIX}", self.label)?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            // end of input: disarm and abort the run
            self.clear();
            return Ok(PromptOutcome::Quit);
        }
        match line.trim_end_matches('\n') {
            "y" | "yes" => {
                self.clear();
                Ok(PromptOutcome::Proceed)
            }
            "q" | "quit" => Ok(PromptOutcome::Quit),
            "" | "n" | "no" => Ok(PromptOutcome::Proceed),
            other => {
                writeln!(out, "{other:?} ignored")?;
                Ok(PromptOutcome::Proceed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(p: &Prompt, msg: &str, input: &str) -> (PromptOutcome, String) {
        let mut out = Vec::new();
        let outcome = p
            .prompt_with(msg, &mut input.as_bytes(), &mut out)
            .expect("prompt io");
        (outcome, String::from_utf8(out).unwrap())
    }

    #[test]
    fn disarmed_prompt_is_silent() {
        let p = Prompt::new("pause");
        let (outcome, out) = run(&p, "test-0", "");
        assert_eq!(outcome, PromptOutcome::Proceed);
        assert_eq!(out, "");
    }

    #[test]
    fn yes_disarms_and_proceeds() {
        let p = Prompt::new("pause");
        p.set();
        let (outcome, out) = run(&p, "test-1", "y\n");
        assert_eq!(outcome, PromptOutcome::Proceed);
        assert!(!p.is_set(), "yes should disarm");
        assert_eq!(out, format!("test-1; pause{PROMPT_SUFFIX}"));
    }

    #[test]
    fn no_proceeds_and_stays_armed() {
        let p = Prompt::new("step");
        p.set();
        let (outcome, _) = run(&p, "test-2", "no\n");
        assert_eq!(outcome, PromptOutcome::Proceed);
        assert!(p.is_set());
    }

    #[test]
    fn end_of_input_quits() {
        let p = Prompt::new("pause");
        p.set();
        let (outcome, _) = run(&p, "test-3", "");
        assert_eq!(outcome, PromptOutcome::Quit);
        assert!(!p.is_set());
    }

    #[test]
    fn quit_quits_without_disarming() {
        let p = Prompt::new("pause");
        p.set();
        let (outcome, _) = run(&p, "test-4", "quit\n");
        assert_eq!(outcome, PromptOutcome::Quit);
    }

    #[test]
    fn junk_is_reported_and_ignored() {
        let p = Prompt::new("pause");
        p.set();
        let (outcome, out) = run(&p, "test-5", "x\n");
        assert_eq!(outcome, PromptOutcome::Proceed);
        assert!(out.ends_with("\"x\" ignored\n"), "got {out:?}");
    }
}
