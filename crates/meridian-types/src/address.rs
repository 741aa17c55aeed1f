//! Account addresses.

use crate::PublicKey;
use std::fmt;

/// A standard account address: the public spend and view keys, plus the
/// flags carried by parsed wallet addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AccountAddress {
    /// Public spend key.
    pub spend: PublicKey,
    /// Public view key.
    pub view: PublicKey,
    /// True for subaddresses. Subaddresses cannot stake.
    pub is_subaddress: bool,
    /// True when a short payment id is embedded (integrated address).
    pub has_payment_id: bool,
}

impl AccountAddress {
    /// The null address used when no winner exists.
    pub const NULL: AccountAddress = AccountAddress {
        spend: PublicKey::NULL,
        view: PublicKey::NULL,
        is_subaddress: false,
        has_payment_id: false,
    };

    /// A plain standard address from its two keys.
    pub fn new(spend: PublicKey, view: PublicKey) -> Self {
        Self {
            spend,
            view,
            is_subaddress: false,
            has_payment_id: false,
        }
    }

    /// True when both component keys are zero.
    pub fn is_null(&self) -> bool {
        self.spend.is_null() && self.view.is_null()
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(spend={}, view={})", self.spend, self.view)
    }
}
