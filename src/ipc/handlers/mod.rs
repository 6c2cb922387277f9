pub mod access;
pub mod admin;
pub mod attendance;
pub mod batches;
pub mod class_history;
pub mod core;
pub mod fees;
pub mod keys;
pub mod students;
pub mod test_scores;
