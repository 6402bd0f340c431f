//! Rebuild the index from the file store and print the report as JSON.
//!
//! Uses the same configuration as the server. Without a database the index
//! lives only for the run, which still validates every stored file. Exits
//! non-zero when any file could not be indexed.

use anyhow::Result;
use instance_repository::build_repository;
use instance_repository::config::AppConfig;
use instance_repository::logic::Reconciler;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let config = AppConfig::load()?;
    let repo = build_repository(&config).await?;
    println!("Rebuilding index of {} ...", repo.files.root().display());

    let report = Reconciler::new(repo).rebuild().await?;
    for class in &report.classes {
        println!(
            "{}: {} instances, {} solutions, {} skipped, fingerprint {}",
            class.problem_uid,
            class.instances_indexed,
            class.solutions_indexed,
            class.skipped.len(),
            class.fingerprint
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.skipped() > 0 {
        anyhow::bail!("{} files could not be indexed", report.skipped());
    }
    Ok(())
}
