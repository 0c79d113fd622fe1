//! Refreshable data domains of a player record.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently refreshable category of player data.
///
/// Each domain has its own "last updated at" column, its own sweep cadence,
/// and touches a disjoint set of payload fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Mastery,
    Rank,
    Account,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Mastery, Domain::Rank, Domain::Account];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Mastery => "mastery",
            Domain::Rank => "rank",
            Domain::Account => "account",
        }
    }

    /// Column holding this domain's last successful refresh time.
    pub fn timestamp_column(self) -> &'static str {
        match self {
            Domain::Mastery => "last_mastery_update_at",
            Domain::Rank => "last_rank_update_at",
            Domain::Account => "last_account_update_at",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// A set of [`Domain`]s requested in a single refresh.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DomainSet: u8 {
        const MASTERY = 1;
        const RANK = 1 << 1;
        const ACCOUNT = 1 << 2;
    }
}

impl DomainSet {
    /// Domains contained in this set, in declaration order.
    pub fn domains(self) -> impl Iterator<Item = Domain> {
        Domain::ALL
            .into_iter()
            .filter(move |d| self.contains(DomainSet::from(*d)))
    }

    pub fn insert_domain(&mut self, domain: Domain) {
        self.insert(DomainSet::from(domain));
    }

    pub fn has(self, domain: Domain) -> bool {
        self.contains(DomainSet::from(domain))
    }
}

impl From<Domain> for DomainSet {
    fn from(domain: Domain) -> Self {
        match domain {
            Domain::Mastery => DomainSet::MASTERY,
            Domain::Rank => DomainSet::RANK,
            Domain::Account => DomainSet::ACCOUNT,
        }
    }
}

impl FromIterator<Domain> for DomainSet {
    fn from_iter<I: IntoIterator<Item = Domain>>(iter: I) -> Self {
        iter.into_iter()
            .fold(DomainSet::empty(), |set, d| set | DomainSet::from(d))
    }
}

impl fmt::Display for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.domains().map(Domain::as_str).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(", "))
        }
    }
}
