//! Operator confirmation capability.
//!
//! The upgrade engine asks for confirmation through [`Confirmer`] so that the
//! interactive terminal prompt can be swapped for a fixed answer when the tool
//! runs unattended.

use std::io;

use clap::ValueEnum;
use dialoguer::{Confirm, theme::ColorfulTheme};

/// Yes/no confirmation source.
pub trait Confirmer: Send + Sync {
    /// Ask `prompt`; `Ok(true)` continues, `Ok(false)` aborts.
    ///
    /// An `Err` means no answer could be obtained at all.
    fn confirm(&self, prompt: &str) -> io::Result<bool>;
}

/// Blocking terminal prompt. Waits indefinitely for an answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Pre-supplied answer for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirmer for FixedAnswer {
    fn confirm(&self, _prompt: &str) -> io::Result<bool> {
        Ok(self.0)
    }
}

/// How confirmation prompts are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConfirmPolicy {
    /// Ask on the terminal
    #[default]
    Prompt,
    /// Answer yes without asking
    Yes,
    /// Answer no without asking
    No,
}

impl ConfirmPolicy {
    pub fn confirmer(self) -> Box<dyn Confirmer> {
        match self {
            ConfirmPolicy::Prompt => Box::new(TerminalConfirmer),
            ConfirmPolicy::Yes => Box::new(FixedAnswer(true)),
            ConfirmPolicy::No => Box::new(FixedAnswer(false)),
        }
    }
}
