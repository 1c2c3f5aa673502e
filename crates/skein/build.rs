use {
    rustc_version::{version_meta, Channel},
    std::env,
};

// CHANNEL_NIGHTLY is based on:
// https://stackoverflow.com/questions/61417452/how-to-get-a-feature-requirement-tag-in-the-documentation-generated-by-cargo-do/70914430#70914430
fn main() {
    println!("cargo:rustc-check-cfg=cfg(CHANNEL_NIGHTLY)");
    println!("cargo:rustc-check-cfg=cfg(skein_ucontext)");

    if matches!(version_meta(), Ok(meta) if meta.channel == Channel::Nightly) {
        println!("cargo:rustc-cfg=CHANNEL_NIGHTLY");
    }

    // libc only declares getcontext/makecontext/swapcontext for glibc on a few architectures, and
    // the trampoline splits its argument into two 32-bit halves, which assumes a 64-bit target.
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let wanted = env::var_os("CARGO_FEATURE_UCONTEXT").is_some();
    if wanted && os == "linux" && target_env == "gnu" && arch == "x86_64" {
        println!("cargo:rustc-cfg=skein_ucontext");
    }
}
