fn main() {
    if let Err(e) = fetchdeck::run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
