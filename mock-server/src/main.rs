use std::time::Duration;

use mock_server::MockApi;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let client_id = std::env::var("MOCK_CLIENT_ID").unwrap_or_else(|_| "client".to_string());
    let client_secret = std::env::var("MOCK_CLIENT_SECRET").unwrap_or_else(|_| "secret".to_string());
    let ttl = std::env::var("MOCK_CACHE_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs);

    let api = MockApi::with_options(&client_id, &client_secret, "1", ttl);
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("listening on {addr}");
    mock_server::run(listener, api).await
}
