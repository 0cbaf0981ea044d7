//! Member registry for covenant.
//!
//! [`Registrar`] ties the pieces together: registrations go through the
//! identity gate into the hash-chained ledger, identities are re-verified on
//! demand against a minimum [`TrustLevel`](covenant_core::TrustLevel), and
//! verified members may submit proposals to a separate append-only log.
//!
//! ```no_run
//! use covenant_core::Unavailable;
//! use covenant_registry::{Registrar, RegistryConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), covenant_registry::RegistryError> {
//! let config = RegistryConfig::load("registry.toml".as_ref())?;
//! let registrar = Registrar::open(config, Arc::new(Unavailable))?;
//! for member in registrar.list_members()? {
//!     println!("{} {}", member.fingerprint, member.proof_name);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

/// File-based registry configuration.
pub mod config;
/// Error types for registry operations.
pub mod error;
/// Governance proposals and their journal.
pub mod proposal;
/// The registrar facade.
pub mod registrar;
/// Roster views over sealed entries.
pub mod roster;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use proposal::{proposal_id, ProposalLog, ProposalRecord};
pub use registrar::Registrar;
pub use roster::{IdentityDecision, Member, Refusal};
