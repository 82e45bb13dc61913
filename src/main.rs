fn main() {
    if let Err(err) = order_loader::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
