pub mod completion;
pub mod draft;
pub mod transfer;
pub mod workflow;
