// Hide console window on Windows in release builds
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod config;
mod delivery;
mod error;
mod gate;
mod permission;
mod permission_host;
mod radio;
mod session;
mod ui;

use app::{FeatherScan, Wiring};
use config::Config;
use delivery::{DiscoveryEvent, LogSubscriber, ResultDeliveryChannel, DEFAULT_DELIVERY_TARGET_ID};
use iced::Theme;
use permission_host::PromptPermissionHost;
use radio::BtleRadio;
use session::{ScanSessionController, SessionState};
use tokio::runtime::Runtime;

fn main() -> iced::Result {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load().unwrap_or_else(|e| {
        log::error!("{}; falling back to defaults", e);
        Config::default()
    });

    // Runtime for the radio's discovery tasks; lives as long as the UI
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to create async runtime: {}", e);
            std::process::exit(1);
        }
    };
    let radio = BtleRadio::open(runtime.handle().clone());
    if !radio.is_available() {
        log::warn!("Starting without a Bluetooth adapter; scans will not start");
    }

    // Discovery results: dispatcher thread → log + UI
    let delivery = ResultDeliveryChannel::new(DEFAULT_DELIVERY_TARGET_ID);
    let (discovery_sender, discovery_receiver) = crossbeam_channel::unbounded::<DiscoveryEvent>();
    delivery.register(LogSubscriber);
    delivery.register(discovery_sender);

    let (host, prompt_receiver) = PromptPermissionHost::new(config.pre_granted.iter().copied());

    let mut controller = ScanSessionController::new(
        config.platform_tier(),
        config.scan_filters(),
        config.scan_settings(),
        radio,
        host.clone(),
        delivery.target(),
    );
    let (state_sender, state_receiver) = crossbeam_channel::unbounded::<SessionState>();
    controller.observe(state_sender);

    let wiring = Wiring {
        controller,
        host,
        delivery,
        state_receiver,
        discovery_receiver,
        prompt_receiver,
        max_listed_devices: config.max_listed_devices,
    };

    let result = iced::application("Feather Scan: BLE Discovery Toggle", FeatherScan::update, FeatherScan::view)
        .subscription(FeatherScan::subscription)
        .theme(|_| Theme::Light)
        .window_size((900.0, 600.0))
        .run_with(move || FeatherScan::new(wiring));

    drop(runtime);
    result
}
