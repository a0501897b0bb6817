// Match scoring: resume ↔ job post compatibility.
// Features are computed in pure Rust; weights come from a model artifact on disk.

pub mod features;
pub mod handlers;
pub mod model;
pub mod scorer;
pub mod service;
