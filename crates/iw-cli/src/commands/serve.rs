use anyhow::Result;

pub async fn start(host: Option<String>, port: Option<u16>, config_path: &str) -> Result<()> {
    let runtime = super::load_runtime_config(config_path)?;

    let bind_host = host.unwrap_or(runtime.server.bind_host);
    let port = port.unwrap_or(runtime.server.port);

    let server_config = iw_server::ServerConfig {
        bind_host: bind_host.clone(),
        port,
        cors_allowed_origins: runtime.server.cors_allowed_origins,
        engine_config: runtime.engine,
    };

    println!("starting Inkwell server...");
    println!("  REST: http://{bind_host}:{port}");

    iw_server::start_server(server_config)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(())
}
