mod command;
mod command_runner;

pub use command::{Command, CommandRecord};
pub use command_runner::CommandRunner;
