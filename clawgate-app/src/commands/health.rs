use crate::config::Config;
use anyhow::{bail, Result};

pub async fn run(config: &Config) -> Result<()> {
    println!("🏥 Health Check\n");

    let backend = super::backend(config);
    println!("Backend: {}", backend.name());
    println!("Model: {}", config.backend.model);

    print!("🌐 Backend endpoint... ");
    match backend.health().await {
        Ok(()) => println!("✓"),
        Err(e) => {
            println!("✗ ({})", e);
            bail!("backend health check failed");
        }
    }

    println!("\n✅ System healthy");
    Ok(())
}
