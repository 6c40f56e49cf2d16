mod scenarios;
mod system;

pub use system::{wait_until, System};
