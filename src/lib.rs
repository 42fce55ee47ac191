//!   trafficfuse: live traffic trajectory fusion
//!
//!  Fuses intermittent position reports from several feeds into smooth,
//!  continuously queryable aircraft trajectories, and finds the runway a
//!  descending aircraft is about to land on.

pub mod airport;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod network;
pub mod refresh;
pub mod report;
pub mod runway;
pub mod track;
pub mod trajectory;
pub mod worker;

pub use engine::Engine;
