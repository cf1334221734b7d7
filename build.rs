// Build script for the live_effect native library
//
// Android builds link against libc++_shared so symbols pulled in by the
// Oboe C++ library (e.g. __cxa_pure_virtual) resolve on all ABIs.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("android") {
        println!("cargo:rustc-link-lib=c++_shared");
    }
}
