//! Resolution of weighted organizational votes on locale data.
//!
//! For every contest (one base item in one locale), the voters of each
//! organization are reduced to a single organizational vote, weighted by the
//! seniority of the voter behind it. The best scored candidate is then
//! classified by its margin over the runner-up, an approved baseline is
//! protected from inconclusive revotes, and the outcome is stored with all
//! the losing alternates. See the [`manual`] for the complete procedure.
//!
//! ```
//! use vote_resolver::builder::StoreBuilder;
//! use vote_resolver::{AcceptAll, Resolver, ResolverRules, Status, Tier};
//! use vote_resolver::{ContestKey, OutcomeStore};
//!
//! let store = StoreBuilder::new()
//!     .voter(1, "Apple", Tier::Expert)
//!     .contest("fr", 100)
//!     .candidate(101, "Bonjour")
//!     .ballot(1, 101)
//!     .build();
//! let resolver = Resolver::new(&store, &store, &AcceptAll, &store, ResolverRules::DEFAULT_RULES);
//! let report = resolver.run_locale("fr").unwrap();
//! assert_eq!(report.resolved.len(), 1);
//! let stored = store.stored_outcome(&ContestKey::new("fr", 100)).unwrap().unwrap();
//! assert_eq!(stored.outcome.status, Status::Approved);
//! ```

mod config;

pub mod builder;
pub mod cache;
pub mod collation;
pub mod contest;
pub mod manual;
pub mod resolution;
pub mod scheduler;
pub mod store;
pub mod tally;
pub mod writer;

pub use crate::config::*;
pub use crate::contest::{Candidate, CandidateId, Contest, ContestKey};
pub use crate::resolution::{resolve, Resolution, ResolveError};
pub use crate::scheduler::{BatchReport, CancelFlag, LocaleSummary, Resolver};
pub use crate::store::{
    AcceptAll, BallotStore, BoxError, MemoryStore, OutcomeStore, StoreError, Validator,
    VoterDirectory,
};
pub use crate::writer::{build_outcome, Outcome, OutputRecord};
