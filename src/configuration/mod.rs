pub mod command_line;
pub mod constants;
pub(crate) mod deserialize;
pub mod manifest;
