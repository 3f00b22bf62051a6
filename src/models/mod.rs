pub mod link;
pub mod rank;
pub mod user;

pub use link::{
    CreateLinkTokenRequest, LinkAttempt, LinkAttemptKind, LinkAttemptStatus, LinkHistoryEntry,
    LinkHistoryStatus, LinkOutcome, LinkOutcomeKind, LinkToken, LinkUserRequest, UnlinkOptions,
    UnlinkOutcome,
};
pub use rank::{MergeOutcome, MergeResult, RankEntry, RankKind, UserRank};
pub use user::{AggregateUser, ConnectedUserIds, DefaultUser, Platform, Streamer};
