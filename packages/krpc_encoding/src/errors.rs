use failure::Fail;

pub type Error = failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Failure modes of the codec and the identifier/location primitives it
/// backs. Every variant here crosses a trust boundary (untrusted bytes off
/// the wire), so none of them panic.
#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "bencode codec error: {}", cause)]
    Codec { cause: String },

    #[fail(display = "invalid bencode at offset {}", offset)]
    InvalidBencode { offset: usize },

    #[fail(display = "expected a {} value, found something else", expected)]
    WrongType { expected: &'static str },

    #[fail(display = "missing required dict key '{}'", key)]
    MissingKey { key: String },

    #[fail(display = "expected {} bytes for {}, got {}", expected, what, got)]
    WrongLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}
