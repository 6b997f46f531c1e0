// lib.rs
pub mod alignment_file;
pub mod bai;
pub mod bam;
pub mod blocks;
pub mod config;
pub mod error;
pub mod index;
pub mod interval;
pub mod pairing;
pub mod record;
pub mod refdict;
pub mod split_plan;
pub mod split_reader;
pub mod splitter;
pub mod virtual_offset;
