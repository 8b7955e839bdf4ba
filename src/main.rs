#[cfg(feature = "cli")]
pub fn main() {
    use clap::Parser;
    halosim::cli::Cli::parse().run();
}

#[cfg(not(feature = "cli"))]
pub fn main() {
    eprintln!("halosim was built without the `cli` feature");
    std::process::exit(1);
}
