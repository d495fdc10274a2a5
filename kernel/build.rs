//! TrapVM Kernel Build Script
//!
//! Tracks the inputs that change the compiled kernel:
//!
//! - `LOG` selects the maximum log level baked into the image
//! - the target triple decides between the hardware and hosted backends

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=LOG");

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let backend = if target.ends_with("-none-eabi") || target.ends_with("-none-eabihf") {
        "hardware"
    } else {
        "hosted"
    };

    if env::var_os("TRAPVM_BUILD_VERBOSE").is_some() {
        println!("cargo:warning=Building TrapVM kernel for {target} ({profile}, {backend} backend)");
    }
    println!("cargo:rerun-if-env-changed=TRAPVM_BUILD_VERBOSE");
}
