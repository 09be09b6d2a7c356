mod calendar;
mod cli;
mod host;
mod light;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
