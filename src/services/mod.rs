pub mod artifacts;
pub mod client;
pub mod poll;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
