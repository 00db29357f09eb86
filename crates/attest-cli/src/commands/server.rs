//! `attest server` — Start the Attest HTTP backend server.

pub async fn run(host: String, port: u16, db_path: String, offline: bool) -> Result<(), String> {
    let config = attest_server::ServerConfig {
        host: host.clone(),
        port,
        db_path,
        offline,
    };

    println!("Starting Attest server on {}:{}...", host, port);

    let addr = attest_server::start_server(config).await?;
    println!("Attest server listening on http://{}", addr);

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    Ok(())
}
