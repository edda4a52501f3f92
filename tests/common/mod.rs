// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

pub mod fixtures;
pub mod logs;
pub mod observers;

pub use fixtures::{cleanup_database, get_database_url, seed_members_and_teams, setup_database};
