pub mod error;
pub mod config;
pub mod logging;
pub mod geodesy;
pub mod remote;
pub mod model;
pub mod reconciler;
pub mod guard;
pub mod trace;
pub mod session;
pub mod coordinator;
