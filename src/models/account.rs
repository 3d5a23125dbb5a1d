use rust_decimal::Decimal;

use crate::models::errors::BalanceError;
use crate::types::{AccountId, Amount};

/// Current balance of a single user account.
///
/// Balances are signed: a negative balance is debt, repaid automatically by the
/// next credits before any surplus becomes available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// The unique identifier, shared with the user directory.
    pub account_id: AccountId,
    pub balance: Decimal
}

/// How a credit was absorbed by an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit {
    /// Portion of the credit that went to clearing debt.
    pub debt_repaid: Decimal,
    /// Portion left over once the debt was cleared.
    pub surplus: Decimal
}

impl Account {
    pub fn new(account_id: AccountId) -> Self {
        Self::with_balance(account_id, Decimal::ZERO)
    }

    pub fn with_balance(account_id: AccountId, balance: Decimal) -> Self {
        Self {
            account_id,
            balance
        }
    }

    pub fn debt(&self) -> Decimal {
        if self.balance.is_sign_negative() {
            -self.balance
        } else {
            Decimal::ZERO
        }
    }

    pub fn covers(&self, amount: Amount) -> bool {
        self.balance >= amount.value()
    }

    /// Credits the account, repaying any outstanding debt first.
    ///
    /// The resulting balance is always `balance + amount`; the returned
    /// [`Credit`] records how much of it went to debt and how much is surplus.
    ///
    /// # Errors
    /// Returns `BalanceError::Overflow` if the new balance cannot be represented.
    pub fn credit(&mut self, amount: Amount) -> Result<Credit, BalanceError> {
        let requested = amount.value();
        let debt = self.debt();

        let credit = if requested >= debt {
            Credit { debt_repaid: debt, surplus: requested - debt }
        } else {
            Credit { debt_repaid: requested, surplus: Decimal::ZERO }
        };

        self.balance = self.balance.checked_add(requested)
            .ok_or(BalanceError::Overflow { account_id: self.account_id })?;

        Ok(credit)
    }

    /// Debits the account. Funds checks are the caller's concern, so the balance
    /// may go negative here.
    pub fn debit(&mut self, amount: Amount) -> Result<(), BalanceError> {
        self.balance = self.balance.checked_sub(amount.value())
            .ok_or(BalanceError::Overflow { account_id: self.account_id })?;

        Ok(())
    }
}
