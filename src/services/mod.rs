pub mod link_service;
pub mod reconciliation;
pub mod retry;

pub use link_service::LinkService;
pub use reconciliation::Reconciler;
