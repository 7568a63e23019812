#[tokio::main]
async fn main() -> anyhow::Result<()> {
    civitai_dl_ui_terminal::cli::run().await
}
