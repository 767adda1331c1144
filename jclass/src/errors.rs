use std::error::Error;
use std::fmt::Display;

#[derive(Debug)]
pub enum FormatCause {
    IncorrectMagic(u32),
    Truncated,
    ExtraBytes,
    InvalidIndex(u16),
    InvalidTag(u8),
    InvalidDescriptor(String),
    NameMismatch,
}

impl Display for FormatCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatCause::IncorrectMagic(m) => write!(f, "IncorrectMagic: {:02X?}", m),
            FormatCause::Truncated => write!(f, "Truncated"),
            FormatCause::ExtraBytes => write!(f, "ExtraBytes"),
            FormatCause::InvalidIndex(index) => write!(f, "InvalidIndex: {index}"),
            FormatCause::InvalidTag(tag) => write!(f, "InvalidTag: {tag}"),
            FormatCause::InvalidDescriptor(desc) => write!(f, "InvalidDescriptor: {desc}"),
            FormatCause::NameMismatch => write!(f, "NameMismatch"),
        }
    }
}

/// Raised while checking the binary shape of a class file. The runtime
/// surfaces this as a `ClassFormatError`.
#[derive(Debug)]
pub struct FormatError {
    cause: FormatCause,
    msg: String,
}

impl FormatError {
    pub fn new(cause: FormatCause, msg: &str) -> FormatError {
        FormatError {
            cause,
            msg: msg.into(),
        }
    }

    pub fn cause(&self) -> &FormatCause {
        &self.cause
    }
}

impl Error for FormatError {}

impl Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Format Error: {}, {}", self.cause, self.msg)
    }
}
