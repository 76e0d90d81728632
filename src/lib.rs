// crowdstats: engagement leaderboards for monitored Facebook groups
//
// This is the library root. Each module corresponds to one layer of the
// polling pipeline, from the pure ranking code up to the web frontend.

pub mod config;
pub mod credentials;
pub mod db;
pub mod graph;
pub mod poller;
pub mod ranking;
pub mod snapshots;
pub mod status;

#[cfg(feature = "web")]
pub mod web;
