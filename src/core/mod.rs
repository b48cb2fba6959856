// Core modules implementing the port engine, task kinds, codecs, and error modeling.
pub mod command;
pub mod config;
pub mod dispatch;
pub mod errno;
pub mod error;
pub mod file_ops;
pub mod fs;
pub mod port;
pub mod read_file;
pub mod reply;
pub mod simple;
pub mod task;
pub mod timer;
pub mod wire;
pub mod write;
pub mod write_buffer;
