use crate::types::errors::AmountError;
use rust_decimal::Decimal;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

const DECIMAL_PLACES: u32 = 2;
const MINIMUM: &str = "0.01";

/// A strictly positive monetary amount requested for a ledger movement.
///
/// Balances are plain [`Decimal`] values and may go negative; an `Amount` is
/// what a caller asks to move, so it is always at least one cent and never
/// carries more precision than the ledger stores.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Amount(Decimal);

impl Amount {
    /// Validates a raw decimal as a movement amount.
    ///
    /// # Errors
    /// Returns `AmountError` if the value is below `0.01` or has more than two
    /// decimal places.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        let value = value.normalize();

        if value.scale() > DECIMAL_PLACES {
            return Err(AmountError::TooPrecise(DECIMAL_PLACES));
        }

        if value < Decimal::new(1, DECIMAL_PLACES) {
            return Err(AmountError::BelowMinimum { minimum: MINIMUM });
        }

        Ok(Amount(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Display for Amount {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();

        if value.is_empty() {
            return Err(AmountError::InvalidFormat("Value is an empty string".to_string()));
        }

        let parsed = Decimal::from_str(value).map_err(|error| {
            AmountError::InvalidFormat(format!("Value is not a number: {error}"))
        })?;

        Amount::new(parsed)
    }
}
