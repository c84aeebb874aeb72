pub mod emit;
pub mod lower;
pub mod parse;
pub mod verify;
