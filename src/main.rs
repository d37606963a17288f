fn main() {
    if let Err(err) = delivery_insights::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
