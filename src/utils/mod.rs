pub mod command;
pub mod fastx;
pub mod file;
pub mod process;
pub mod sambam;
pub mod stats;
pub mod system;
pub mod workspace;
