//! Seams for the subsystems the link orchestrator coordinates but does not
//! own. Each ledger is mutated only through its owning collaborator's
//! relink/undo API, never written directly by the orchestrator.

pub mod donation;
pub mod experience;
pub mod rank;
pub mod streamer;

pub use donation::{DbDonationLedger, DonationLedger};
pub use experience::{DbExperienceLedger, ExperienceLedger};
pub use rank::{DbRankLedger, RankLedger};
pub use streamer::{DbStreamerDirectory, StreamerDirectory};
