pub mod assembler;
pub mod conversation;
pub mod extract;
pub mod files;
pub mod generation;
pub mod prompt;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
