//! Compile-time switches
//!
//! Generated by `build.rs` from the library defaults merged with the optional
//! `GCF_CONFIG_RS` override file.

include!(concat!(env!("OUT_DIR"), "/gcf_merged_config.rs"));
