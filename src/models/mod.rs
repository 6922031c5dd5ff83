pub mod client;
pub mod delivery_task;
pub mod sender;
pub mod submission;

pub use client::Client;
pub use delivery_task::DeliveryTask;
pub use sender::{BlacklistReason, Sender};
pub use submission::Submission;
