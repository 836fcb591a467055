//! Support code for the `mediadeck-watch` daemon.

pub mod tracker;
