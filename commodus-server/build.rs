fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through COMMODUS_GIT_HASH from Nix build environment
    println!("cargo:rerun-if-env-changed=COMMODUS_GIT_HASH");
    if let Ok(hash) = std::env::var("COMMODUS_GIT_HASH") {
        println!("cargo:rustc-env=COMMODUS_GIT_HASH={}", hash);
    }
}
