// 9.2 custody.rs: balance book for the native coin and every whitelisted token.
// no real chain transfers. the vault, routers and users all hold balances here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Address, TokenId};

// Errors from custody operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("insufficient {token} balance for {holder}: available {available}, requested {requested}")]
    InsufficientBalance {
        holder: Address,
        token: TokenId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("insufficient native balance for {holder}: available {available}, requested {requested}")]
    InsufficientNative {
        holder: Address,
        available: Decimal,
        requested: Decimal,
    },

    #[error("transfer amount must not be negative")]
    InvalidAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Custody {
    // Token that wraps the native coin one to one
    wrapped_native: TokenId,
    native: HashMap<Address, Decimal>,
    tokens: HashMap<(TokenId, Address), Decimal>,
}

impl Custody {
    pub fn new(wrapped_native: TokenId) -> Self {
        Self {
            wrapped_native,
            native: HashMap::new(),
            tokens: HashMap::new(),
        }
    }

    pub fn wrapped_native(&self) -> TokenId {
        self.wrapped_native
    }

    pub fn balance(&self, token: TokenId, holder: Address) -> Decimal {
        self.tokens.get(&(token, holder)).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn native_balance(&self, holder: Address) -> Decimal {
        self.native.get(&holder).copied().unwrap_or(Decimal::ZERO)
    }

    // Credit tokens out of thin air (faucets, tests, bridged deposits)
    pub fn mint(&mut self, token: TokenId, holder: Address, amount: Decimal) {
        *self.tokens.entry((token, holder)).or_insert(Decimal::ZERO) += amount;
    }

    pub fn mint_native(&mut self, holder: Address, amount: Decimal) {
        *self.native.entry(holder).or_insert(Decimal::ZERO) += amount;
    }

    pub fn transfer(
        &mut self,
        token: TokenId,
        from: Address,
        to: Address,
        amount: Decimal,
    ) -> Result<(), CustodyError> {
        self.debit(token, from, amount)?;
        self.mint(token, to, amount);
        Ok(())
    }

    pub fn transfer_native(&mut self, from: Address, to: Address, amount: Decimal) -> Result<(), CustodyError> {
        self.debit_native(from, amount)?;
        self.mint_native(to, amount);
        Ok(())
    }

    // Native coin -> wrapped token, same holder
    pub fn wrap(&mut self, holder: Address, amount: Decimal) -> Result<(), CustodyError> {
        self.debit_native(holder, amount)?;
        self.mint(self.wrapped_native, holder, amount);
        Ok(())
    }

    // Wrapped token -> native coin, paid to `to`
    pub fn unwrap(&mut self, holder: Address, to: Address, amount: Decimal) -> Result<(), CustodyError> {
        self.debit(self.wrapped_native, holder, amount)?;
        self.mint_native(to, amount);
        Ok(())
    }

    /// Settle a swap: `amount_in` of `from` leaves the holder, `amount_out` of `to` arrives.
    pub fn convert(
        &mut self,
        holder: Address,
        from: TokenId,
        amount_in: Decimal,
        to: TokenId,
        amount_out: Decimal,
    ) -> Result<(), CustodyError> {
        self.debit(from, holder, amount_in)?;
        self.mint(to, holder, amount_out);
        Ok(())
    }

    fn debit(&mut self, token: TokenId, holder: Address, amount: Decimal) -> Result<(), CustodyError> {
        if amount < Decimal::ZERO {
            return Err(CustodyError::InvalidAmount);
        }
        let available = self.balance(token, holder);
        if amount > available {
            return Err(CustodyError::InsufficientBalance {
                holder,
                token,
                available,
                requested: amount,
            });
        }
        self.tokens.insert((token, holder), available - amount);
        Ok(())
    }

    fn debit_native(&mut self, holder: Address, amount: Decimal) -> Result<(), CustodyError> {
        if amount < Decimal::ZERO {
            return Err(CustodyError::InvalidAmount);
        }
        let available = self.native_balance(holder);
        if amount > available {
            return Err(CustodyError::InsufficientNative {
                holder,
                available,
                requested: amount,
            });
        }
        self.native.insert(holder, available - amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const WETH: TokenId = TokenId(1);
    const ALICE: Address = Address(10);
    const BOB: Address = Address(11);

    #[test]
    fn wrap_and_unwrap_round_trip_balances() {
        let mut custody = Custody::new(WETH);
        custody.mint_native(ALICE, dec!(2));

        custody.wrap(ALICE, dec!(1.5)).unwrap();
        assert_eq!(custody.native_balance(ALICE), dec!(0.5));
        assert_eq!(custody.balance(WETH, ALICE), dec!(1.5));

        custody.unwrap(ALICE, BOB, dec!(1)).unwrap();
        assert_eq!(custody.balance(WETH, ALICE), dec!(0.5));
        assert_eq!(custody.native_balance(BOB), dec!(1));
    }

    #[test]
    fn overdraw_rejected_without_side_effects() {
        let mut custody = Custody::new(WETH);
        custody.mint(WETH, ALICE, dec!(1));

        let err = custody.transfer(WETH, ALICE, BOB, dec!(2)).unwrap_err();
        assert!(matches!(err, CustodyError::InsufficientBalance { .. }));
        assert_eq!(custody.balance(WETH, ALICE), dec!(1));
        assert_eq!(custody.balance(WETH, BOB), Decimal::ZERO);
    }

    #[test]
    fn wrap_needs_native_funds() {
        let mut custody = Custody::new(WETH);
        assert!(matches!(
            custody.wrap(ALICE, dec!(1)),
            Err(CustodyError::InsufficientNative { .. })
        ));
    }

    #[test]
    fn convert_moves_between_tokens() {
        let mut custody = Custody::new(WETH);
        custody.mint(WETH, ALICE, dec!(1));
        custody.convert(ALICE, WETH, dec!(1), TokenId(3), dec!(3000)).unwrap();
        assert_eq!(custody.balance(WETH, ALICE), Decimal::ZERO);
        assert_eq!(custody.balance(TokenId(3), ALICE), dec!(3000));
    }
}
