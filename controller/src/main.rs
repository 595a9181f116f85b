mod animation;
mod host;
mod hw;
mod led;
mod pump;
mod relay;
mod state;
mod temperature;
mod water_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
