use std::io::Read;

use anyhow::{Context, Result};
use serde_json::json;

use iw_engine::engine::InkwellEngine;

pub async fn run(content: String, user: String, config_path: &str) -> Result<()> {
    let content = if content == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read content from stdin")?;
        buf
    } else {
        content
    };

    let runtime = super::load_runtime_config(config_path)?;
    let engine = InkwellEngine::init(runtime.engine)
        .await
        .context("failed to initialize engine")?;

    let outcome = engine.analyze(&content, &user).await?;
    let output = json!({
        "summary": outcome.result.summary,
        "graphData": outcome.result.concept_graph,
        "notice": outcome.notice,
        "source": outcome.source,
        "cached": outcome.cached,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
