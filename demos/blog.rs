//! A small blog served over HTTP/1.1 with a nested sidebar request.
//!
//! ```text
//! RUST_LOG=hmvc=debug cargo run --example blog
//! curl http://127.0.0.1:8080/blog/view/7
//! ```

use std::sync::Arc;

use hmvc::http::StatusCode;
use hmvc::{Config, Context, Controller, ControllerDef, Controllers, Dispatcher, Result, Route, Routes, Server};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Blog;

impl Controller for Blog {
    fn after(&mut self, cx: &mut Context<'_>) -> Result<()> {
        if cx.request().is_initial() {
            cx.response_mut().set_header("Content-Type", "text/plain; charset=utf-8");
        }
        Ok(())
    }
}

impl Blog {
    fn index(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        cx.redirect("blog/view/1", StatusCode::Found)?;
        Ok(())
    }

    fn view(&mut self, cx: &mut Context<'_>, params: &[String]) -> Result<()> {
        let id = params.first().map_or("1", String::as_str).to_owned();
        let sidebar = cx.fetch("blog/sidebar")?;
        let body = format!("post #{id}\n\n{sidebar}\n");
        cx.response_mut().set_body(body);
        cx.check_cache(None)
    }

    fn sidebar(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        cx.response_mut().write("recent: #1 #2 #3");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config {
        index_file: None,
        ..Config::default()
    };

    let mut routes = Routes::new();
    routes.set(
        "default",
        Route::new("(:controller(/:action(/:id)))")?.defaults([("controller", "blog")]),
    )?;

    let mut controllers = Controllers::new();
    controllers.register(
        "blog",
        ControllerDef::new(Blog::default)
            .action("index", Blog::index)
            .action("view", Blog::view)
            .action("sidebar", Blog::sidebar),
    );

    let server = Server::bind(&config.bind).await?;
    println!("Listening on http://{}", server.local_addr());
    server
        .run(Arc::new(Dispatcher::new(config, routes, controllers)))
        .await?;
    Ok(())
}
