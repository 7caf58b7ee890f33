use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};
use url::Url;

#[derive(Parser)]
#[command(name = "liten-cli")]
#[command(about = "Management CLI for the Liten Gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "LITEN_ADMIN_URL", default_value = "http://127.0.0.1:8081")]
    url: Url,

    #[arg(short, long, env = "LITEN_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status: uptime, routes, counters, tunnel
    Status,
    /// List API keys
    ListKeys,
    /// Add an API key
    AddKey { key: String },
    /// Remove an API key
    RemoveKey { key: String },
    /// Route a host to a target
    AddDomain {
        host: String,
        target: String,
        /// Accept WebSocket upgrades
        #[arg(long)]
        ws: bool,
        /// Do not require an API key
        #[arg(long)]
        public: bool,
        /// Requests per window per client
        #[arg(long)]
        rate_limit: Option<u32>,
        /// Add CORS headers to responses
        #[arg(long)]
        cors: bool,
    },
    /// Remove a host route
    RemoveDomain { host: String },
    /// List host routes
    ListDomains,
    /// Show one host route
    ShowDomain { host: String },
    /// List path routes
    ListRoutes,
    /// Show recent activity
    Logs {
        #[arg(default_value_t = 10)]
        n: usize,
    },
    /// Re-read the configuration file
    Reload,
    /// Manage the public tunnel
    Tunnel {
        #[command(subcommand)]
        action: TunnelAction,
    },
}

#[derive(Subcommand)]
enum TunnelAction {
    /// Open the tunnel
    Start {
        /// Local port to expose (defaults to the gateway's)
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        authtoken: Option<String>,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        subdomain: Option<String>,
        #[arg(long)]
        region: Option<String>,
    },
    /// Close the tunnel
    Stop,
    /// Show the tunnel URL and uptime
    Status,
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, Box<dyn std::error::Error>> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| "admin URL cannot be a base")?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;

    let (method, url, body) = match cli.command {
        Commands::Status => (Method::GET, endpoint(&cli.url, &["admin", "status"])?, None),
        Commands::ListKeys => (Method::GET, endpoint(&cli.url, &["admin", "keys"])?, None),
        Commands::AddKey { key } => (Method::PUT, endpoint(&cli.url, &["admin", "keys", &key])?, None),
        Commands::RemoveKey { key } => (Method::DELETE, endpoint(&cli.url, &["admin", "keys", &key])?, None),
        Commands::AddDomain {
            host,
            target,
            ws,
            public,
            rate_limit,
            cors,
        } => {
            let body = json!({
                "target": target,
                "ws": ws,
                "api_key_required": !public,
                "rate_limit": rate_limit,
                "cors": cors,
            });
            (Method::PUT, endpoint(&cli.url, &["admin", "domains", &host])?, Some(body))
        }
        Commands::RemoveDomain { host } => {
            (Method::DELETE, endpoint(&cli.url, &["admin", "domains", &host])?, None)
        }
        Commands::ListDomains => (Method::GET, endpoint(&cli.url, &["admin", "domains"])?, None),
        Commands::ShowDomain { host } => (Method::GET, endpoint(&cli.url, &["admin", "domains", &host])?, None),
        Commands::ListRoutes => (Method::GET, endpoint(&cli.url, &["admin", "routes"])?, None),
        Commands::Logs { n } => {
            let mut url = endpoint(&cli.url, &["admin", "logs"])?;
            url.query_pairs_mut().append_pair("n", &n.to_string());
            (Method::GET, url, None)
        }
        Commands::Reload => (Method::POST, endpoint(&cli.url, &["admin", "reload"])?, None),
        Commands::Tunnel { action } => {
            let url = endpoint(&cli.url, &["admin", "tunnel"])?;
            match action {
                TunnelAction::Start {
                    port,
                    authtoken,
                    domain,
                    subdomain,
                    region,
                } => {
                    let body = json!({
                        "port": port,
                        "authtoken": authtoken,
                        "domain": domain,
                        "subdomain": subdomain,
                        "region": region,
                    });
                    (Method::POST, url, Some(body))
                }
                TunnelAction::Stop => (Method::DELETE, url, None),
                TunnelAction::Status => (Method::GET, url, None),
            }
        }
    };

    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let ok = print_response(request.send().await?).await?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<bool, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        let text = res.text().await.unwrap_or_default();
        match serde_json::from_str::<Value>(&text) {
            Ok(body) => {
                if let Some(message) = body.get("error").and_then(Value::as_str) {
                    eprintln!("{}", message);
                }
                if body.get("kind").and_then(Value::as_str) == Some("tunnel_auth_required") {
                    eprintln!();
                    eprintln!("ngrok needs an authtoken:");
                    eprintln!("  1. Get one at https://dashboard.ngrok.com/get-started/your-authtoken");
                    eprintln!("  2. export NGROK_AUTHTOKEN=<token>, set ngrok.authtoken in the config,");
                    eprintln!("     or pass --authtoken to `liten-cli tunnel start`");
                }
            }
            Err(_) if !text.is_empty() => eprintln!("Response: {}", text),
            Err(_) => {}
        }
        return Ok(false);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(true)
}
