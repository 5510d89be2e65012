mod app;
mod cli;

use clap::Parser;
use cli::Cli;
use route_meter_core::config::Config;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let file_config = Config::load(&cli.config).ok();
    let _guard = route_meter_core::lifecycle::logging::init_logging(
        &cli.log_level,
        file_config.as_ref().is_some_and(|c| c.logging_to_file),
        file_config.as_ref().and_then(|c| c.log_dir.as_deref()),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let application = app::Application::build(&cli)?;
        application.serve().await
    })
}
