use std::net::SocketAddr;

use net::web_server::{self, ServerChannels};
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::shutdown::ShutdownRx;
use crate::world::{run_world_thread, GameWorld};

/// Handles to a running server.
pub struct RunningServer {
    pub addr: SocketAddr,
    world_thread: std::thread::JoinHandle<()>,
    web_task: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    /// Wait for the world thread and the web server to finish.
    pub async fn join(self) {
        let world_thread = self.world_thread;
        if let Err(e) = tokio::task::spawn_blocking(move || world_thread.join()).await {
            tracing::error!("World thread join failed: {}", e);
        }
        if let Err(e) = self.web_task.await {
            tracing::error!("Web server task failed: {}", e);
        }
    }
}

/// Wire up output router, web server and world thread on a bound listener.
pub async fn start(
    config: ServerConfig,
    listener: TcpListener,
    shutdown_rx: ShutdownRx,
) -> std::io::Result<RunningServer> {
    let addr = listener.local_addr()?;

    let (world_tx, world_rx) = tokio::sync::mpsc::unbounded_channel();
    let (output_tx, output_rx) = tokio::sync::mpsc::unbounded_channel();
    let (register_tx, register_rx) = tokio::sync::mpsc::unbounded_channel();
    let (unregister_tx, unregister_rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(net::output_router::run_output_router(
        output_rx,
        register_rx,
        unregister_rx,
    ));

    let channels = ServerChannels {
        world_tx,
        register_tx,
        unregister_tx,
    };
    let web_config = config.to_web_server_config();
    let web_shutdown = shutdown_rx.clone().into_inner();
    let web_task = tokio::spawn(async move {
        if let Err(e) = web_server::serve(listener, channels, web_config, Some(web_shutdown)).await {
            tracing::error!("Web server error: {}", e);
        }
    });
    tracing::info!(%addr, "Overworld server listening");

    let world = GameWorld::from_config(&config, output_tx);
    let tick_config = config.to_tick_config();
    let world_thread = std::thread::Builder::new()
        .name("world".to_string())
        .spawn(move || run_world_thread(world_rx, world, tick_config, shutdown_rx))?;

    Ok(RunningServer {
        addr,
        world_thread,
        web_task,
    })
}

/// Bind the configured address and start.
pub async fn bind_and_start(config: ServerConfig, shutdown_rx: ShutdownRx) -> std::io::Result<RunningServer> {
    let listener = TcpListener::bind(&config.net.ws_addr).await?;
    start(config, listener, shutdown_rx).await
}
