pub mod chat;
pub mod chunks;
pub mod conversations;
pub mod folders;
pub mod health;
