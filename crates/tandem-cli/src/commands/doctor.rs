//! Diagnostic command to check store and cache connectivity.

use tandem_core::{CacheBackendKind, Config};
use tandem_session::{SessionBackend, SessionError};

use crate::AppContext;

pub async fn run(ctx: &AppContext) -> anyhow::Result<()> {
    println!("Running diagnostics...\n");

    // Check config directory
    let config_dir = Config::config_dir();
    println!("Config directory: {:?}", config_dir);
    if config_dir.join("config.toml").exists() {
        println!("  ✓ config.toml found");
    } else {
        println!("  - No config.toml (defaults in use)");
    }

    // Check configuration
    println!("\nConfiguration:");
    let result = ctx.config.validate();
    if result.is_ok() {
        println!("  ✓ Valid");
    }
    for issue in result.errors() {
        println!("  ✗ {}: {}", issue.field, issue.message);
    }
    for issue in result.warnings() {
        println!("  ! {}: {}", issue.field, issue.message);
    }
    if !result.is_ok() {
        println!("\nDiagnostics stopped: fix the configuration errors above.");
        return Ok(());
    }

    // Check record store
    let store_path = ctx.config.store.resolved_path();
    println!("\nRecord store: {:?}", store_path);
    let backend = match SessionBackend::from_config(&ctx.config).await {
        Ok(backend) => {
            println!("  ✓ Opened");
            backend
        }
        Err(SessionError::Cache(e)) => {
            println!("  ✓ Opened");
            println!("\nCache:");
            println!("  ✗ Could not connect: {}", e);
            return Ok(());
        }
        Err(e) => {
            println!("  ✗ {}", e);
            return Ok(());
        }
    };

    // Check cache
    println!("\nCache:");
    match ctx.config.cache.backend {
        CacheBackendKind::Memory => println!("  - In-process memory cache"),
        CacheBackendKind::Redis => match backend.ping_cache().await {
            Ok(()) => println!("  ✓ Redis responding"),
            Err(e) => println!("  ✗ Redis not responding: {}", e),
        },
    }

    println!("\nDiagnostics complete.");
    Ok(())
}
