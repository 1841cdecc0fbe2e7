/// Interactive confirmation before destructive actions
use anyhow::{Context, Result};
use std::io::{BufRead, Write};

use crate::error::ProvisionError;

/// The only answer that lets a destructive action proceed
pub const CONFIRMATION_WORD: &str = "yes";

/// Ask the operator to type `yes`
///
/// Surrounding whitespace is ignored; the comparison is case-sensitive. EOF counts as a refusal.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> Result<()> {
    write!(output, "{} Type '{}' to continue: ", prompt, CONFIRMATION_WORD)
        .context("Failed to write confirmation prompt")?;
    output.flush().context("Failed to flush confirmation prompt")?;

    let mut answer = String::new();
    input
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;

    if answer.trim() == CONFIRMATION_WORD {
        Ok(())
    } else {
        Err(ProvisionError::Declined.into())
    }
}

/// Confirm on the process's stdin/stdout
pub fn confirm_stdin(prompt: &str) -> Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut output = std::io::stdout();
    confirm(&mut input, &mut output, prompt)
}
