//! Output safety validation
//!
//! Agent output is untrusted. Before anything lands in the context map it is
//! checked for dangerous ASCII control characters, Unicode characters used
//! for display manipulation, and size. HT, LF and CR are the only permitted
//! controls.

use thiserror::Error;

/// Maximum accepted output size in bytes (4 MB).
pub const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// A rejected output, with the message surfaced to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutputViolation {
    #[error("Output contains dangerous control characters")]
    ControlCharacters,
    #[error("Output contains Unicode manipulation characters")]
    UnicodeManipulation,
    #[error("Output exceeds maximum size: {0} bytes")]
    TooLarge(usize),
}

/// Validate a node output string.
pub fn validate_output(output: &str) -> Result<(), OutputViolation> {
    if output.len() > MAX_OUTPUT_BYTES {
        return Err(OutputViolation::TooLarge(output.len()));
    }
    for ch in output.chars() {
        if is_dangerous_control(ch) {
            return Err(OutputViolation::ControlCharacters);
        }
        if is_unicode_manipulation(ch) {
            return Err(OutputViolation::UnicodeManipulation);
        }
    }
    Ok(())
}

/// C0 controls excluding HT (0x09), LF (0x0A) and CR (0x0D).
fn is_dangerous_control(ch: char) -> bool {
    matches!(ch, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}')
}

/// Directional overrides and isolates, zero-width characters, BOM.
fn is_unicode_manipulation(ch: char) -> bool {
    matches!(
        ch,
        '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' | '\u{200B}'..='\u{200D}' | '\u{FEFF}'
    )
}
