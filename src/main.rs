//! Page Mock - CLI Entry Point
//!
//! Validates mock files and dry-runs requests against them without a browser.

use anyhow::Result;
use clap::Parser;
use page_mock::driver::{CallbackController, Decision};
use page_mock::{Interceptor, MockServerConfig, PageRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG: &str = r#"# Page mock configuration
mocks:
  - id: user
    request:
      method: GET
      url: /api/users/:id
    response:
      template: true
      body:
        type: json
        content:
          id: "{{params.id}}"
          name: "User {{params.id}}"
    priority: 10

  - id: search
    request:
      method: GET
      url: http://api.example.com/search
      query:
        q: rust
    response:
      headers:
        X-Mocked: "true"
      body:
        type: json
        content:
          results: []

  - id: health
    request:
      url: /health
    response:
      body:
        type: text
        content: ok
    once: true

settings:
  get_request_timeout_ms: 100
  default_content_type: application/json;charset=UTF-8
  cors: true
  log_matches: true
  log_unmatched: true
"#;

#[derive(Parser, Debug)]
#[command(
    name = "page-mock",
    about = "Request mocking for browser-driven tests - validate mock files and dry-run requests",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "page-mock.yaml")]
    config: PathBuf,

    /// Request to dry-run, as "METHOD URL" (repeatable)
    #[arg(short, long, value_name = "REQUEST")]
    request: Vec<String>,

    /// URL of the page issuing the requests
    #[arg(long, default_value = "http://localhost:3000/")]
    origin: String,

    /// Request header, as "Name: value" (repeatable)
    #[arg(short = 'H', long, value_name = "HEADER")]
    header: Vec<String>,

    /// Request body for dry-run requests
    #[arg(long)]
    body: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

impl Args {
    fn page_request(&self, request: &str) -> Result<PageRequest> {
        let (method, url) = request
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| anyhow::anyhow!("Invalid request {:?}, expected \"METHOD URL\"", request))?;

        let mut page_request = PageRequest::new(method.to_uppercase(), url.trim())
            .with_frame_url(self.origin.as_str());
        for header in &self.header {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("Invalid header {:?}, expected \"Name: value\"", header))?;
            page_request = page_request.with_header(name.trim(), value.trim());
        }
        if let Some(body) = &self.body {
            page_request = page_request.with_post_data(body.as_str());
        }
        Ok(page_request)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Print default config if requested
    if args.print_config {
        println!("{}", DEFAULT_CONFIG);
        return Ok(());
    }

    // Load configuration
    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no mocks)");
        MockServerConfig::default()
    };

    // Validate and exit if requested
    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} mocks defined)",
            config.mocks.len()
        );
        return Ok(());
    }

    let controller = Arc::new(CallbackController::new());
    let interceptor = Interceptor::from_config(controller.clone(), &config)?;
    interceptor.activate().await?;

    for request in &args.request {
        let page_request = args.page_request(request)?;
        let output = match controller.on_request(&page_request).decision().await {
            Ok(Decision::Fulfill(data)) => serde_json::json!({
                "request": request,
                "decision": "fulfill",
                "response": data,
            }),
            Ok(Decision::Continue) => serde_json::json!({
                "request": request,
                "decision": "continue",
            }),
            Err(e) => serde_json::json!({
                "request": request,
                "decision": "error",
                "error": e.to_string(),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    interceptor.deactivate().await?;
    info!(
        total = interceptor.total_requests(),
        matched = interceptor.total_matched(),
        unmatched = interceptor.total_unmatched(),
        "Dry run finished"
    );

    Ok(())
}
