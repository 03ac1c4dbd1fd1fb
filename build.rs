fn main() {
    println!("cargo::rerun-if-env-changed=DISKPROV_VERSION");
}
