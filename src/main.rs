#[tokio::main]
async fn main() {
    if let Err(error) = focusboard::run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
