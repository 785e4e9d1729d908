#[tokio::main]
async fn main() -> std::io::Result<()> {
    live_session::run_with_config().await
}
