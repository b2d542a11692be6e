pub mod credential;
pub mod stored;
