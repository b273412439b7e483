//! Filament demo server
//!
//! ```text
//! filament-demo --address 127.0.0.1:8000 --log-format json
//! curl localhost:8000/hello/ann
//! curl -XPOST localhost:8000/rpc -d '{"id":1,"method":"Add","params":[1,"2"]}'
//! ```

use anyhow::Context as _;
use clap::Parser;
use filament_core::{
    logging, BodyLimit, BoxFuture, Condition, ContentTypes, Context, Logging, LogFormat,
    MediaType, MiddlewareExt, PoweredBy, Recover, RequestId, Result, Server, ServerConfig,
    Service, Test, Timeout,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "filament-demo")]
#[command(about = "Example Filament server", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    address: SocketAddr,

    /// Log level or filter directive
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Request deadline in seconds, 0 disables it
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Largest accepted request body in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    body_limit: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    name: String,
    #[serde(default)]
    message: Option<String>,
}

fn index(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move { ctx.text(200, "filament") })
}

fn hello(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let name = ctx.param("name").unwrap_or("world").to_string();
        ctx.send(200, &json!({ "hello": name }))
    })
}

fn create_greeting(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let greeting: Greeting = ctx.bind()?;
        ctx.send(201, &greeting)
    })
}

fn static_file(ctx: &mut Context) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let file = ctx.param("*").unwrap_or_default().to_string();
        ctx.text(200, format!("would serve {file}"))
    })
}

fn service() -> Service {
    Service::new()
        .method("Echo", |_ctx: &Context, (msg,): (String,)| async move {
            Ok::<_, String>(msg)
        })
        .method("Add", |_ctx: &Context, (a, b): (i64, i64)| async move {
            a.checked_add(b).ok_or("overflow")
        })
        .method("Whoami", |ctx: &Context, (): ()| {
            let id = ctx.uniq().to_string();
            let ip = ctx.ip();
            async move { Ok::<_, String>(json!({ "id": id, "ip": ip })) }
        })
        .method("Subscribe", |ctx: &Context, (topic, every_ms): (String, Option<u64>)| {
            let notifier = ctx.socket().map(|s| s.notifier().clone());
            async move {
                let notifier = notifier.ok_or("subscriptions need a websocket")?;
                let every = Duration::from_millis(every_ms.unwrap_or(1000));
                tokio::spawn(async move {
                    let mut tick = 0u64;
                    while !notifier.is_closed() {
                        tokio::time::sleep(every).await;
                        tick += 1;
                        if notifier.notify("tick", vec![json!(topic), json!(tick)]).await.is_err() {
                            break;
                        }
                    }
                });
                Ok::<_, &str>(true)
            }
        })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format);

    let config = ServerConfig {
        address: cli.address,
        max_body_size: cli.body_limit,
        ..ServerConfig::default()
    };
    let mut server = Server::new(config);

    server.add_middleware(Logging);
    server.add_middleware(Recover);
    server.add_middleware(RequestId);
    server.add_middleware(PoweredBy::default());
    server.add_middleware(BodyLimit::new(cli.body_limit));
    server.add_middleware(Timeout::new(Duration::from_secs(cli.timeout)));
    server.add_middleware(
        ContentTypes::media(&[
            MediaType::Json,
            MediaType::Xml,
            MediaType::MsgPack,
            MediaType::Cbor,
            MediaType::Form,
        ])
        .when(Condition::method(Test::is(["POST", "PUT", "PATCH"]))),
    );

    server
        .router_mut()
        .detect_method_not_allowed(true)
        .get("/", index)
        .get("/hello", hello)
        .get("/hello/:name", hello)
        .post("/greetings", create_greeting)
        .get("/static/*", static_file)
        .rpc("/rpc", Arc::new(service()));

    info!(address = %cli.address, "Starting filament demo");
    server.serve().await.context("server failed")?;
    Ok(())
}
