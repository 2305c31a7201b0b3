use std::{env, fs, path::PathBuf};

fn main() {
    // Put `memory.x` on the linker search path
    let out = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    fs::write(out.join("memory.x"), include_bytes!("memory.x")).unwrap();
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=memory.x");

    // Only the test harness provides this script
    println!("cargo:rustc-link-arg-tests=-Tembedded-test.x");
}
