//! Records build provenance for `dgmux version --extended`.

const EXPORTS: [(&str, &str); 2] = [
    ("TARGET", "DGMUX_BUILD_TARGET"),
    ("PROFILE", "DGMUX_BUILD_PROFILE"),
];

fn main() {
    for (source, exported) in EXPORTS {
        let value = std::env::var(source).unwrap_or_else(|_| "unknown".to_string());
        println!("cargo:rustc-env={exported}={value}");
        println!("cargo:rerun-if-env-changed={source}");
    }
}
