fn main() {
    println!("cargo:rerun-if-env-changed=VERSION");
}
