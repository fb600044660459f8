//! Thin binary entry point: all the real work happens in `parr_core::cli`.

fn main() {
    std::process::exit(parr_core::cli::main());
}
