pub mod agent;
pub mod capability;
pub mod policy;
pub mod task;
