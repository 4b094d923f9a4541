//! Build script for gcfiber-core
//!
//! Writes `OUT_DIR/gcf_merged_config.rs`: the switch table's defaults with
//! the optional `GCF_CONFIG_RS` override file applied on top.

#[path = "src/config/switches.rs"]
#[allow(dead_code)]
mod switches;

use std::env;
use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-env-changed=GCF_CONFIG_RS");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/config/switches.rs");

    let overrides = match env::var("GCF_CONFIG_RS") {
        Ok(path) => {
            println!("cargo:rerun-if-changed={}", path);
            match fs::read_to_string(&path) {
                Ok(content) => {
                    println!("cargo:warning=Using custom config: {}", path);
                    Some(content)
                }
                Err(e) => {
                    println!("cargo:warning=Failed to read GCF_CONFIG_RS ({}): {}", path, e);
                    None
                }
            }
        }
        Err(_) => None,
    };

    let (values, issues) = switches::merge(overrides.as_deref().unwrap_or(""));
    for issue in &issues {
        println!("cargo:warning=GCF_CONFIG_RS {}", issue);
    }

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest = Path::new(&out_dir).join("gcf_merged_config.rs");
    fs::write(&dest, switches::render(&values, overrides.is_some()))
        .expect("Failed to write merged config");
}
