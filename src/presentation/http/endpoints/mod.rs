pub mod events;
pub mod health;
pub mod root;
pub mod sequences;
pub mod worker;
