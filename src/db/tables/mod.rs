pub mod ledgers;
pub mod link_attempts;
pub mod users;
