use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Copy memory.x and device.x into OUT_DIR so the linker can find them
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    for script in ["memory.x", "device.x"] {
        fs::copy(script, out_dir.join(script)).unwrap();
        println!("cargo:rerun-if-changed={}", script);
    }
    println!("cargo:rustc-link-search={}", out_dir.display());
    println!("cargo:rerun-if-changed=build.rs");
}
