pub mod collector;
pub mod kill;
pub mod process;
pub mod provider;
pub mod replay;
pub mod snapshot;
