/// Shared execution primitives: command invocation, retry, idempotency, confirmation
pub mod command;
pub mod idempotent;
pub mod prompt;
pub mod retry;

#[cfg(test)]
pub mod testing;
