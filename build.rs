//! Thaw Build Script
//!
//! Compiles the bundled `find_encryption_info` routine into a static library
//! when the `native_oracle` feature is enabled.

fn main() {
    println!("cargo:rerun-if-changed=native/encryption_info.c");

    if std::env::var_os("CARGO_FEATURE_NATIVE_ORACLE").is_some() {
        build_native_oracle();
    }
}

fn build_native_oracle() {
    use std::path::PathBuf;

    let source = PathBuf::from("native").join("encryption_info.c");
    if !source.exists() {
        println!("cargo:warning=native/encryption_info.c not found - bundled oracle disabled");
        return;
    }

    cc::Build::new()
        .file(&source)
        .warnings(true)
        .flag_if_supported("-Wno-unused-parameter")
        .compile("thaw_encryption_info");

    println!("cargo:rustc-link-lib=static=thaw_encryption_info");
}
