use std::path::Path;

fn main() {
    // Re-run if git HEAD changes (new commits, checkouts, etc.)
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");

    let hash = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default();

    println!("cargo:rustc-env=GIT_HASH={hash}");

    // The sandboxed codec module is built outside cargo by lib/build-module.sh.
    // When the gzip'ed artifact is present it gets embedded; otherwise the
    // sandboxed backend needs a module path from config.
    println!("cargo::rustc-check-cfg=cfg(webpgate_embedded_module)");
    println!("cargo:rerun-if-changed=lib");
    if Path::new("lib/webp.wasm.gz").is_file() {
        println!("cargo:rustc-cfg=webpgate_embedded_module");
    }
}
