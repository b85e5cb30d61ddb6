pub mod fanout;
pub mod nanopore_mapping;
pub mod report;
