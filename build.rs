fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Write build-time information (git commit, compiler, build time) for the
    // CLI's version banner.
    if let Err(e) = built::write_built_file() {
        panic!("Failed to acquire build-time information: {e}");
    }
}
