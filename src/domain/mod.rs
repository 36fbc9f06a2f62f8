pub mod grouping;
pub mod models;
pub mod schedule;
pub mod slots;
pub mod time_window;
