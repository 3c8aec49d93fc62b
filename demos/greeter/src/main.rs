//! Greeter Example
//!
//! Serves one request per name given on the command line.  The chain is
//! built from three plugins:
//!
//! ```text
//! Greeting (config) ──▶ Greeter ──▶ greeting middleware ──▶ Reply
//!                        ▲
//!                        └── enhancer: adds "!" when `excited = true`
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package greeter -- --config demos/greeter/greeter.toml alice bob
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use weft::prelude::*;
use weft::runtime::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "greeter", about = "Greets names through a weft middleware chain")]
struct Args {
    /// Names to greet, one request each
    #[arg(default_values_t = vec!["world".to_string()])]
    names: Vec<String>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile
    #[arg(short, long)]
    profile: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GreetingConfig {
    text: String,
    #[serde(default)]
    excited: bool,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            text: "Hello".to_string(),
            excited: false,
        }
    }
}

trait Greet: Send + Sync {
    fn greet(&self, name: &str) -> String;
}

struct Plain {
    text: String,
}

impl Greet for Plain {
    fn greet(&self, name: &str) -> String {
        format!("{}, {name}", self.text)
    }
}

struct Excited(Arc<dyn Greet>);

impl Greet for Excited {
    fn greet(&self, name: &str) -> String {
        format!("{}!", self.0.greet(name))
    }
}

/// Request input.
#[derive(Debug, Clone)]
struct Name(String);

/// Request output.
#[derive(Debug, Clone)]
struct Reply(String);

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = WeftRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    let mut runtime = builder.build()?;

    let greeting: Token<GreetingConfig> = Token::new("Greeting");
    let greeter: Token<dyn Greet> = Token::new("Greeter");
    let served: Token<AtomicUsize> = Token::new("Served");

    match runtime.bind_config(&greeting) {
        Ok(()) => {}
        Err(RuntimeError::Config(ConfigError::MissingSection { section })) => {
            info!(%section, "No greeting configured, using the default");
            runtime.app_mut()?.configure(&greeting, GreetingConfig::default());
        }
        Err(e) => return Err(e.into()),
    }

    let app = runtime.app_mut()?;

    let config = greeting.clone();
    app.register(
        &greeter,
        Plugin::<dyn Greet>::new()
            .dep("greeting", &greeting)
            .provides(move |deps: &Deps| -> Arc<dyn Greet> {
                let text = deps
                    .get(&config)
                    .map(|c| c.text.clone())
                    .unwrap_or_default();
                Arc::new(Plain { text })
            }),
    );

    // The enhancer declares its own dependency on the greeting config.
    let config = greeting.clone();
    app.enhance(&greeter, move |inner: Option<Arc<dyn Greet>>| {
        let config = config.clone();
        Plugin::<dyn Greet>::new()
            .dep("greeting", &config)
            .provides_optional(move |deps: &Deps| -> Option<Arc<dyn Greet>> {
                let inner = inner.clone()?;
                let excited = deps.get(&config).is_some_and(|c| c.excited);
                if excited {
                    Some(Arc::new(Excited(inner)))
                } else {
                    Some(inner)
                }
            })
    });

    app.register(
        &served,
        Plugin::<AtomicUsize>::new()
            .provides(|_: &Deps| AtomicUsize::new(0))
            .cleanup(|count: Arc<AtomicUsize>| async move {
                info!(served = count.load(Ordering::Relaxed), "Greeter shutting down");
                Ok::<_, BoxError>(())
            }),
    );

    // Outermost: timing
    app.middleware(Middleware::new(|ctx: Arc<Context>, next: Next| async move {
        let started = Instant::now();
        let result = next.run().await;
        debug!(
            context = ctx.id().get(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Request finished"
        );
        result
    }));

    let display_name = memoize(|ctx: &Context| {
        ctx.get_state::<Name>()
            .map(|Name(name)| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "stranger".to_string())
    });

    let (g, s) = (greeter.clone(), served.clone());
    app.middleware_with(
        Dependencies::new()
            .with("greeter", &greeter)
            .with("served", &served),
        move |deps: &Deps| {
            let (Some(greeter), Some(served)) = (deps.get(&g), deps.get(&s)) else {
                return Middleware::passthrough();
            };
            let display_name = display_name.clone();
            Middleware::new(move |ctx: Arc<Context>, next: Next| {
                let reply = greeter.greet(&display_name.get(&ctx));
                ctx.set_state(Reply(reply));
                served.fetch_add(1, Ordering::Relaxed);
                next.run()
            })
        },
    );

    runtime.start().await?;

    for name in &args.names {
        let ctx = Context::new();
        ctx.set_state(Name(name.clone()));
        let ctx = runtime.handle(ctx).await?;
        if let Some(Reply(reply)) = ctx.get_state::<Reply>() {
            println!("{reply}");
        }
    }

    let stats = runtime.stats().await;
    info!(
        requests = stats.requests,
        plugins = stats.plugins,
        middleware = stats.middleware,
        "All requests served"
    );

    runtime.stop().await?;
    Ok(())
}
