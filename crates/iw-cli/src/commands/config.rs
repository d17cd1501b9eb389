use anyhow::{Context, Result};

const REDACTED: &str = "<redacted>";

pub fn show(config_path: &str) -> Result<()> {
    let path = super::shellexpand(config_path);
    if std::path::Path::new(&path).exists() {
        println!("# config file: {path}");
    } else {
        println!("# no config file at {path}; showing defaults");
    }

    let runtime = super::load_runtime_config(config_path)?;
    println!("{}", render(runtime)?);
    Ok(())
}

fn render(mut runtime: super::RuntimeConfig) -> Result<String> {
    if runtime.engine.llm.api_key.is_some() {
        runtime.engine.llm.api_key = Some(REDACTED.into());
    }
    toml::to_string_pretty(&runtime).context("failed to render config as TOML")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::RuntimeConfig;

    #[test]
    fn api_key_is_redacted() {
        let mut runtime = RuntimeConfig::default();
        runtime.engine.llm.api_key = Some("sk-live-123".into());
        let rendered = render(runtime).unwrap();
        assert!(!rendered.contains("sk-live-123"));
        assert!(rendered.contains(REDACTED));
    }

    #[test]
    fn rendered_config_parses_back() {
        let rendered = render(RuntimeConfig::default()).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.server.port, 9480);
        assert_eq!(parsed.engine.search.result_limit, 10);
    }
}
