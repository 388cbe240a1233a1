pub mod job;
pub mod profile;
pub mod verdict;
pub mod verification;
