mod event;

pub use event::{
    AccountClosed, AccountCredited, AccountDebited, AccountEvent, AccountFrozen, AccountOpened,
    AccountUnfrozen,
};

use crate::config::MAX_OWNER_NAME_LEN;
use crate::error::AccountError;
use crate::ledger::TransferKind;
use crate::money::{CurrencyCode, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "frozen" => Ok(AccountStatus::Frozen),
            "closed" => Ok(AccountStatus::Closed),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

/// The Account aggregate.
///
/// Every mutation bumps `version` by one and buffers exactly one domain
/// event; [`Account::release_events`] drains the buffer by value. Closed
/// is terminal, and only an active account may be debited or credited.
#[derive(Debug, Clone)]
pub struct Account {
    id: Uuid,
    owner_name: String,
    currency: CurrencyCode,
    balance: Money,
    status: AccountStatus,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<AccountEvent>,
}

impl Account {
    /// Open a new active account. Emits `account.opened` at version 0.
    pub fn open(
        id: Uuid,
        owner_name: String,
        currency: CurrencyCode,
        initial_balance: Money,
    ) -> Result<Self, AccountError> {
        if owner_name.trim().is_empty() {
            return Err(AccountError::BlankOwnerName);
        }
        if owner_name.chars().count() > MAX_OWNER_NAME_LEN {
            return Err(AccountError::OwnerNameTooLong(MAX_OWNER_NAME_LEN));
        }
        if initial_balance.currency() != currency {
            return Err(AccountError::CurrencyMismatch {
                account: currency,
                amount: initial_balance.currency(),
            });
        }

        let now = Utc::now();
        let mut account = Self {
            id,
            owner_name,
            currency,
            balance: initial_balance,
            status: AccountStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        };
        account.events.push(AccountEvent::Opened(AccountOpened {
            account_id: id,
            owner_name: account.owner_name.clone(),
            currency,
            initial_balance_minor_units: initial_balance.minor_units(),
            occurred_at: now,
        }));
        Ok(account)
    }

    /// Rehydrate from storage. The event buffer starts empty.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        owner_name: String,
        currency: CurrencyCode,
        balance: Money,
        status: AccountStatus,
        version: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_name,
            currency,
            balance,
            status,
            version,
            created_at,
            updated_at,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_name(&self) -> &str {
        &self.owner_name
    }

    pub fn currency(&self) -> CurrencyCode {
        self.currency
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn guard_operational(&self) -> Result<(), AccountError> {
        match self.status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Frozen => Err(AccountError::Frozen),
            AccountStatus::Closed => Err(AccountError::Closed),
        }
    }

    fn guard_currency(&self, amount: &Money) -> Result<(), AccountError> {
        if amount.currency() != self.currency {
            return Err(AccountError::CurrencyMismatch {
                account: self.currency,
                amount: amount.currency(),
            });
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }

    /// Subtract `amount` from the balance.
    pub fn debit(
        &mut self,
        amount: Money,
        transfer_id: Uuid,
        counterparty_account_id: Uuid,
        kind: TransferKind,
    ) -> Result<(), AccountError> {
        self.guard_operational()?;
        self.guard_currency(&amount)?;
        self.balance = self.balance.checked_sub(&amount)?;

        let now = Utc::now();
        self.touch(now);
        self.events.push(AccountEvent::Debited(AccountDebited {
            account_id: self.id,
            transfer_id,
            counterparty_account_id,
            kind,
            amount_minor_units: amount.minor_units(),
            currency: self.currency,
            balance_after_minor_units: self.balance.minor_units(),
            occurred_at: now,
        }));
        Ok(())
    }

    /// Add `amount` to the balance.
    pub fn credit(
        &mut self,
        amount: Money,
        transfer_id: Uuid,
        counterparty_account_id: Uuid,
        kind: TransferKind,
    ) -> Result<(), AccountError> {
        self.guard_operational()?;
        self.guard_currency(&amount)?;
        self.balance = self.balance.checked_add(&amount)?;

        let now = Utc::now();
        self.touch(now);
        self.events.push(AccountEvent::Credited(AccountCredited {
            account_id: self.id,
            transfer_id,
            counterparty_account_id,
            kind,
            amount_minor_units: amount.minor_units(),
            currency: self.currency,
            balance_after_minor_units: self.balance.minor_units(),
            occurred_at: now,
        }));
        Ok(())
    }

    pub fn freeze(&mut self) -> Result<(), AccountError> {
        if self.status != AccountStatus::Active {
            return Err(AccountError::InvalidState {
                status: self.status,
                action: "freeze",
            });
        }
        let now = Utc::now();
        self.status = AccountStatus::Frozen;
        self.touch(now);
        self.events.push(AccountEvent::Frozen(AccountFrozen {
            account_id: self.id,
            occurred_at: now,
        }));
        Ok(())
    }

    pub fn unfreeze(&mut self) -> Result<(), AccountError> {
        if self.status != AccountStatus::Frozen {
            return Err(AccountError::InvalidState {
                status: self.status,
                action: "unfreeze",
            });
        }
        let now = Utc::now();
        self.status = AccountStatus::Active;
        self.touch(now);
        self.events.push(AccountEvent::Unfrozen(AccountUnfrozen {
            account_id: self.id,
            occurred_at: now,
        }));
        Ok(())
    }

    /// Close the account. Terminal, and requires a zero balance.
    pub fn close(&mut self) -> Result<(), AccountError> {
        if self.status == AccountStatus::Closed {
            return Err(AccountError::InvalidState {
                status: self.status,
                action: "close",
            });
        }
        if !self.balance.is_zero() {
            return Err(AccountError::NonZeroBalanceOnClose {
                balance: self.balance.minor_units(),
            });
        }
        let now = Utc::now();
        self.status = AccountStatus::Closed;
        self.touch(now);
        self.events.push(AccountEvent::Closed(AccountClosed {
            account_id: self.id,
            occurred_at: now,
        }));
        Ok(())
    }

    /// Drain the buffered events. Afterwards the aggregate behaves as if
    /// freshly loaded.
    pub fn release_events(&mut self) -> Vec<AccountEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn open(balance: i64) -> Account {
        Account::open(
            Uuid::new_v4(),
            "Ada Lovelace".to_string(),
            usd(),
            Money::new(balance, usd()).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn open_emits_opened_at_version_zero() {
        let mut account = open(1000);
        assert_eq!(account.version(), 0);
        assert_eq!(account.status(), AccountStatus::Active);

        let events = account.release_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            AccountEvent::Opened(e) => {
                assert_eq!(e.initial_balance_minor_units, 1000);
                assert_eq!(e.owner_name, "Ada Lovelace");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!account.has_pending_events());
    }

    #[test]
    fn open_rejects_blank_and_oversized_names() {
        let blank = Account::open(
            Uuid::new_v4(),
            "   ".to_string(),
            usd(),
            Money::zero(usd()),
        );
        assert_eq!(blank.unwrap_err(), AccountError::BlankOwnerName);

        let long = Account::open(
            Uuid::new_v4(),
            "x".repeat(256),
            usd(),
            Money::zero(usd()),
        );
        assert_eq!(long.unwrap_err(), AccountError::OwnerNameTooLong(255));
    }

    #[test]
    fn debit_and_credit_bump_version_once_each() {
        let mut account = open(1000);
        let transfer = Uuid::now_v7();
        let other = Uuid::new_v4();

        account
            .debit(
                Money::new(300, usd()).unwrap(),
                transfer,
                other,
                TransferKind::Transfer,
            )
            .unwrap();
        assert_eq!(account.version(), 1);
        assert_eq!(account.balance().minor_units(), 700);

        account
            .credit(
                Money::new(50, usd()).unwrap(),
                transfer,
                other,
                TransferKind::Transfer,
            )
            .unwrap();
        assert_eq!(account.version(), 2);
        assert_eq!(account.balance().minor_units(), 750);

        let events = account.release_events();
        assert_eq!(events.len(), 3); // opened, debited, credited
        match &events[1] {
            AccountEvent::Debited(e) => assert_eq!(e.balance_after_minor_units, 700),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn debit_guards() {
        let mut account = open(100);
        let t = Uuid::now_v7();
        let other = Uuid::new_v4();

        let too_much = Money::new(101, usd()).unwrap();
        assert_eq!(
            account
                .debit(too_much, t, other, TransferKind::Transfer)
                .unwrap_err(),
            AccountError::InsufficientFunds {
                need: 101,
                have: 100
            }
        );

        let eur = CurrencyCode::new("EUR").unwrap();
        assert!(matches!(
            account
                .debit(Money::new(1, eur).unwrap(), t, other, TransferKind::Transfer)
                .unwrap_err(),
            AccountError::CurrencyMismatch { .. }
        ));

        account.freeze().unwrap();
        assert_eq!(
            account
                .debit(Money::new(1, usd()).unwrap(), t, other, TransferKind::Transfer)
                .unwrap_err(),
            AccountError::Frozen
        );

        // Failed mutations must not consume balance or version
        assert_eq!(account.balance().minor_units(), 100);
    }

    #[test]
    fn credit_overflow_fails_loudly() {
        let mut account = open(i64::MAX);
        let err = account
            .credit(
                Money::new(1, usd()).unwrap(),
                Uuid::now_v7(),
                Uuid::new_v4(),
                TransferKind::Transfer,
            )
            .unwrap_err();
        assert_eq!(err, AccountError::BalanceOverflow);
    }

    #[test]
    fn lifecycle_machine() {
        let mut account = open(0);
        account.freeze().unwrap();
        assert_eq!(account.status(), AccountStatus::Frozen);
        assert!(matches!(
            account.freeze().unwrap_err(),
            AccountError::InvalidState { .. }
        ));
        account.unfreeze().unwrap();
        account.close().unwrap();
        assert_eq!(account.status(), AccountStatus::Closed);

        // closed is terminal
        assert!(matches!(
            account.freeze().unwrap_err(),
            AccountError::InvalidState { .. }
        ));
        assert!(matches!(
            account.close().unwrap_err(),
            AccountError::InvalidState { .. }
        ));
    }

    #[test]
    fn close_requires_zero_balance() {
        let mut account = open(5);
        assert_eq!(
            account.close().unwrap_err(),
            AccountError::NonZeroBalanceOnClose { balance: 5 }
        );

        // a frozen account with zero balance can close
        let mut other = open(0);
        other.freeze().unwrap();
        other.close().unwrap();
    }
}
