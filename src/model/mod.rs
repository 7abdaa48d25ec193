//! Pure derivation from snapshots: rates, rolling history, process trees and
//! table views. Nothing in here touches the OS or the async runtime.

pub mod history;
pub mod pipeline;
pub mod rate;
pub mod tree;
pub mod view;
