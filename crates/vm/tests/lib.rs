mod common;

mod exceptions;
mod execution;
mod generators;
mod imports;
mod objects;
