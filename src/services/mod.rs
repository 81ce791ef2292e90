pub mod clock;
pub mod network;
