pub mod reports;
pub mod votes;
