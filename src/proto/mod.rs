mod encode;
mod framer;

pub use encode::{command as encode_command, Reply};
pub use framer::{inline_to_args, Frame, Framer, ParsedFrame};
