pub mod reassembler;
pub mod receiver;
pub mod session;
pub mod splitter;
pub mod staging;
pub mod worker;
