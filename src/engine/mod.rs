mod history;
mod ledger;
mod locks;
#[cfg(test)]
mod tests;

pub use ledger::Ledger;
