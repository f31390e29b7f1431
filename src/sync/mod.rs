pub mod planning;
pub mod samples;
pub mod users;
