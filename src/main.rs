use solosight_lib::RunOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    solosight_lib::init_tracing();

    let mut options = RunOptions::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--record" => options.record = true,
            other => tracing::warn!("Ignoring unknown argument {:?}", other),
        }
    }

    solosight_lib::run(options).await
}
