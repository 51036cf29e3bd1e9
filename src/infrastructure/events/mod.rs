pub mod file_drop;
