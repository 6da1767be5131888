use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use invoke_bridge::frontend::{self, REPORT_TIME_ELAPSED, TEST_COMMAND, TIME_ELAPSED_EVENT};
use invoke_bridge::{
    Args, BridgeClient, ClientConfig, CommandRouter, EventBus, Host, HttpHost, InvokeContext,
    InvokeServer, ServerConfig, Surfaces, parse_arg, telemetry,
};
use serde_json::json;
use tracing::info;

struct DemoArgs {
    port: u16,
    origins: Vec<String>,
    ticks: u64,
    interval: Duration,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let demo = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!(
                "Usage: invoke-demo [--port N] [--origin URL]... [--ticks N] [--interval-ms N]"
            );
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --port <n>          Port to serve on [default: 0, any free port]");
            eprintln!("  --origin <url>      Allowed CORS origin, repeatable");
            eprintln!("  --ticks <n>         time_elapsed events to emit [default: 3]");
            eprintln!("  --interval-ms <n>   Milliseconds between events [default: 1000]");
            process::exit(2);
        }
    };

    telemetry::init_tracing();

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")
        .and_then(|rt| rt.block_on(run(demo)));

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<DemoArgs, String> {
    let mut demo = DemoArgs {
        port: 0,
        origins: Vec::new(),
        ticks: 3,
        interval: Duration::from_millis(1000),
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag {
            "--port" => {
                demo.port = value()?
                    .parse()
                    .map_err(|e| format!("invalid --port: {e}"))?;
            }
            "--origin" => demo.origins.push(value()?),
            "--ticks" => {
                demo.ticks = value()?
                    .parse()
                    .map_err(|e| format!("invalid --ticks: {e}"))?;
            }
            "--interval-ms" => {
                let ms: u64 = value()?
                    .parse()
                    .map_err(|e| format!("invalid --interval-ms: {e}"))?;
                if ms == 0 {
                    return Err("--interval-ms must be at least 1".to_string());
                }
                demo.interval = Duration::from_millis(ms);
            }
            "--help" | "-h" => return Err(String::new()),
            arg => return Err(format!("unexpected argument: {arg}")),
        }
        i += 1;
    }

    Ok(demo)
}

async fn test_command(
    ctx: InvokeContext,
    args: Args,
) -> Result<serde_json::Value, serde_json::Value> {
    let n: u64 = parse_arg(&ctx, &args, "args")?;
    Ok(json!(format!("{n} processed")))
}

fn host_router(ticks: u64, interval: Duration) -> CommandRouter {
    CommandRouter::new()
        .command(TEST_COMMAND, test_command)
        .command(REPORT_TIME_ELAPSED, move |ctx, _args| async move {
            let emitter = ctx.emitter().clone();
            let window = ctx.window().to_string();
            tokio::spawn(async move {
                let mut timer = tokio::time::interval(interval);
                timer.tick().await;
                for seconds in 1..=ticks {
                    timer.tick().await;
                    let payload = json!({"seconds": seconds});
                    if let Err(e) = emitter.emit_to(&window, TIME_ELAPSED_EVENT, payload) {
                        tracing::warn!(error = %e, "Failed to emit time_elapsed");
                    }
                }
            });
            Ok::<_, serde_json::Value>(serde_json::Value::Null)
        })
}

/// How long to wait for every tick: the ticks plus a few intervals of slack.
/// `None` when that does not fit in a `Duration`; the run then waits without
/// a deadline.
fn wait_deadline(interval: Duration, ticks: u64) -> Option<Duration> {
    let intervals = u32::try_from(ticks).ok()?.saturating_add(5);
    interval.checked_mul(intervals)
}

async fn run(demo: DemoArgs) -> anyhow::Result<()> {
    let mut config = ServerConfig::default().with_port(demo.port);
    for origin in &demo.origins {
        config = config.with_origin(origin.clone());
    }

    let server = InvokeServer::new(config, host_router(demo.ticks, demo.interval))
        .bind()
        .await?;
    let base_url = format!("http://{}", server.local_addr());
    let shutdown = server.shutdown_handle();
    let serving = server.start();

    let host = HttpHost::new(ClientConfig::new(&base_url))?;
    let bus = EventBus::new();
    let forwarder = host
        .forward_events(bus.clone())
        .await
        .context("failed to attach to the host event stream")?;
    let client = BridgeClient::new(Arc::new(host), bus.clone());

    let surfaces = Surfaces::new();
    let mut elapsed = surfaces
        .get_or_create(frontend::TIME_ELAPSED_SURFACE)
        .watch();
    let mounted = frontend::mount(&client, &surfaces);
    info!(%base_url, "Frontend mounted against host");

    let last_tick = json!({"seconds": demo.ticks}).to_string();
    let all_ticks = async {
        while demo.ticks > 0 && *elapsed.borrow_and_update() != last_tick {
            if elapsed.changed().await.is_err() {
                break;
            }
            info!(time_elapsed = %*elapsed.borrow(), "Surface updated");
        }
    };
    let waited = async {
        match wait_deadline(demo.interval, demo.ticks) {
            Some(deadline) => tokio::time::timeout(deadline, all_ticks)
                .await
                .context("timed out waiting for time_elapsed events"),
            None => {
                all_ticks.await;
                Ok(())
            }
        }
    };

    tokio::select! {
        result = waited => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    if let Err(e) = mounted.response.await {
        tracing::warn!(error = %e, "Response continuation did not finish");
    }

    for (id, text) in surfaces.snapshot() {
        info!(surface = %id, %text, "Final surface");
    }

    mounted.unsubscribe.unsubscribe();
    shutdown.shutdown();
    bus.shutdown();

    serving.await??;
    let _ = forwarder.await;
    Ok(())
}
