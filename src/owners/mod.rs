/// Vehicle owner records and their reconciliation with portal accounts
///
/// Owner records are entered by the back office and carry no reference to
/// an account. The link is derived on every request by the resolver.
mod repository;
mod resolver;

pub use crate::db::models::OwnerRecord;
pub use repository::OwnerRepository;
pub use resolver::{MatchRule, OwnerMatch, OwnerResolver};

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Back-office data entry for a new owner
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct NewOwner {
    #[validate(length(min = 2, max = 120))]
    pub name: String,
    #[validate(length(min = 4, max = 32))]
    pub national_id: Option<String>,
    #[validate(length(min = 6, max = 20))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 250))]
    pub address: Option<String>,
    pub photo_path: Option<String>,
}

/// Whether the caller's account is linked to an owner record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Linked,
    Unlinked,
}
