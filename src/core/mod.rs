pub mod board;
pub mod date_key;
pub mod drag;
pub mod mutation;
pub mod project;
pub mod suggestion;
pub mod task;
pub mod temporal;
