pub mod health;
pub mod retrieval;
