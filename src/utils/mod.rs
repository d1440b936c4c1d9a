pub mod sanitize;
pub mod security;
