//! Wire protocol types for parent-worker communication.
//!
//! Two byte streams, no request identifiers:
//! - **Instruction channel** (worker stdin): one byte per instruction
//! - **Response channel** (worker stdout): one `true`/`false` line per Query

/// Instruction from parent to worker. Encoded as a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Instruction {
    SetFalse = 0,
    SetTrue = 1,
    /// Ask the worker to print its current value.
    Query = 2,
}

impl Instruction {
    /// The Set instruction that stores `value`.
    pub fn set(value: bool) -> Self {
        if value { Self::SetTrue } else { Self::SetFalse }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether the worker answers this instruction with a response line.
    pub fn expects_response(self) -> bool {
        matches!(self, Self::Query)
    }
}

impl TryFrom<u8> for Instruction {
    type Error = UnknownInstruction;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::SetFalse),
            1 => Ok(Self::SetTrue),
            2 => Ok(Self::Query),
            other => Err(UnknownInstruction(other)),
        }
    }
}

impl From<Instruction> for u8 {
    fn from(instruction: Instruction) -> Self {
        instruction.as_byte()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown instruction byte {0:#04x}")]
pub struct UnknownInstruction(pub u8);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid response line {0:?}, expected \"true\" or \"false\"")]
pub struct InvalidResponse(pub String);

/// Textual form of a value on the response channel (without line terminator).
pub fn format_response(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Parse a response line. The line terminator must already be stripped.
pub fn parse_response(line: &str) -> Result<bool, InvalidResponse> {
    match line {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(InvalidResponse(other.to_string())),
    }
}
