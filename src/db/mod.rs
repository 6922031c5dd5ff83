pub mod clients;
pub mod delivery_tasks;
pub mod leases;
pub mod rate_limits;
pub mod senders;
pub mod submissions;
