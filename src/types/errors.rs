use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount error: {0}")]
    InvalidFormat(String),
    #[error("Amount error: value must be at least {minimum}")]
    BelowMinimum {
        minimum: &'static str
    },
    #[error("Amount error: at most {0} decimal places are allowed")]
    TooPrecise(u32)
}
