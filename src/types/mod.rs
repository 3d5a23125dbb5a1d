mod amount;
mod errors;

pub use amount::Amount;
pub use errors::AmountError;

pub type AccountId = u64;
pub type TransactionId = u64;
