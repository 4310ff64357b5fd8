//! `http2mqtt` bridges `HTTP` smart home devices to an `MQTT` broker.
//!
//! It polls myStrom and Shelly switches and Edimax plugs, receives myStrom
//! button actions and publishes everything, optionally with Home Assistant
//! discovery.

#![forbid(unsafe_code)]

mod config;
mod error;
mod mqtt;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use http2mqtt::driver::SwitchDriver;

use http2mqtt_devices::buttons::ButtonReceiver;
use http2mqtt_devices::edimax::{EDIMAX_NODE_ID, EDIMAX_PLUG_TOPIC, EdimaxPlugClient};
use http2mqtt_devices::mystrom::{MYSTROM_NODE_ID, MYSTROM_SWITCH_TOPIC, MyStromSwitchClient};
use http2mqtt_devices::shelly::{SHELLY_NODE_ID, SHELLY_SWITCH_TOPIC, ShellySwitchClient};

use axum::Router;

use clap::Parser;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use tokio_util::sync::CancellationToken;

use tracing::{error, info};

use crate::config::{Config, LogLevel};
use crate::error::Result;
use crate::mqtt::MqttBus;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path of the configuration file.
    #[arg(short, long, default_value = "./config.json")]
    config: PathBuf,

    /// Overrides the log level of the configuration file.
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_file(&cli.config)?;

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(cli.log_level.unwrap_or(config.log_level)))
        .init();

    info!(
        config = %cli.config.display(),
        "Starting http2mqtt {}",
        env!("CARGO_PKG_VERSION")
    );

    let cancellation_token = CancellationToken::new();
    let discovery = config.home_assistant.discovery;

    let (bus, event_loop) = MqttBus::new(&config.mqtt);
    let bus = Arc::new(bus);

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    tasks.push(tokio::spawn(event_loop.run(cancellation_token.clone())));

    if let Some(plugin) = config.options.mystrom_switch {
        let options = plugin.switch_options(MYSTROM_SWITCH_TOPIC, MYSTROM_NODE_ID, discovery);
        let driver = SwitchDriver::new(
            MyStromSwitchClient::new(plugin.switches)?,
            Arc::clone(&bus),
            options,
        );
        let token = cancellation_token.clone();
        tasks.push(tokio::spawn(async move { driver.run(token).await }));
        info!("myStrom switch plugin started");
    }

    if let Some(plugin) = config.options.shelly_switch {
        let options = plugin.switch_options(SHELLY_SWITCH_TOPIC, SHELLY_NODE_ID, discovery);
        let driver = SwitchDriver::new(
            ShellySwitchClient::new(plugin.switches)?,
            Arc::clone(&bus),
            options,
        );
        let token = cancellation_token.clone();
        tasks.push(tokio::spawn(async move { driver.run(token).await }));
        info!("Shelly switch plugin started");
    }

    if let Some(plugin) = config.options.edimax_plug {
        let options = plugin.switch_options(EDIMAX_PLUG_TOPIC, EDIMAX_NODE_ID, discovery);
        let driver = SwitchDriver::new(
            EdimaxPlugClient::new(plugin.switches)?,
            Arc::clone(&bus),
            options,
        );
        let token = cancellation_token.clone();
        tasks.push(tokio::spawn(async move { driver.run(token).await }));
        info!("Edimax plug plugin started");
    }

    let mut router = Router::new();
    if let Some(plugin) = config.options.mystrom_buttons {
        let receiver = Arc::new(
            ButtonReceiver::new(Arc::clone(&bus), plugin.mqtt_topic, plugin.buttons)
                .home_assistant_discovery(discovery),
        );
        receiver.announce().await;
        router = router.merge(receiver.router(&plugin.route));
        info!(route = %plugin.route, "myStrom button plugin started");
    }

    let listener = TcpListener::bind((config.http.host.as_str(), config.http.port)).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    let token = cancellation_token.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        {
            error!("HTTP server stopped with an error: {e}");
        }
    }));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => error!("Unable to listen for the shutdown signal, shutting down: {e}"),
    }
    cancellation_token.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!("Failed to await a task: {e}");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("http2mqtt: {e}");
            ExitCode::FAILURE
        }
    }
}
