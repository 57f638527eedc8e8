pub mod chemistry;
pub mod digest;
pub mod indices;
pub mod modification;
pub mod modification_table;
pub mod peak;
pub mod peak_container;
