pub mod cache_lock;
pub mod display;
pub mod tolerance_ranges;
