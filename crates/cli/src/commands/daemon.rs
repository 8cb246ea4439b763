//! Foreground daemon entry point, reached via `ab daemon run`.

use ab_core::daemon::Daemon;
use ab_core::engine::create_engine;
use ab_core::registry::SessionRegistry;

pub async fn run(registry: &SessionRegistry, session: &str) -> anyhow::Result<()> {
    let config = registry.load_config(session);
    let engine = create_engine(&config.backend)?;
    let daemon = Daemon::new(session, registry.clone(), engine);
    daemon.run().await?;
    Ok(())
}
