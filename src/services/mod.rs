pub mod allocator;
pub mod coordinator;
pub mod reference;
