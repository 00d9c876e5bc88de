//! Top-level bridge loop.
//!
//! Owns the bus connection state and drives the fixed-cadence poll/publish
//! cycle. On every (re)connect edge the retained liveness message and the
//! full discovery catalog are republished; each minute tick polls the device
//! and publishes the canonical value map. Shutdown is cooperative: an
//! in-flight poll cycle completes before the loop exits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::catalog::ChannelCatalog;
use crate::clock::ClockReconciler;
use crate::config::BridgeConfig;
use crate::csv::CsvExporter;
use crate::device::{DeviceIdentity, HeatPumpConnector};
use crate::mqtt::{MessageBus, MqttBus};
use crate::session::SessionRunner;

pub struct Bridge<C: HeatPumpConnector, B: MessageBus = MqttBus> {
    bus: B,
    connect_rx: mpsc::UnboundedReceiver<()>,
    catalog: ChannelCatalog,
    runner: SessionRunner<C>,
    clock: Option<ClockReconciler<C>>,
    exporter: Option<CsvExporter>,
}

impl<C: HeatPumpConnector> Bridge<C, MqttBus> {
    pub fn new(config: &BridgeConfig, identity: DeviceIdentity, connector: Arc<C>) -> Self {
        let (bus, connect_rx) = MqttBus::connect(&config.mqtt);
        Self::with_bus(config, identity, connector, bus, connect_rx)
    }
}

impl<C: HeatPumpConnector, B: MessageBus> Bridge<C, B> {
    /// Wire the loop to an explicit bus and connect-edge channel.
    pub fn with_bus(
        config: &BridgeConfig,
        identity: DeviceIdentity,
        connector: Arc<C>,
        bus: B,
        connect_rx: mpsc::UnboundedReceiver<()>,
    ) -> Self {
        let catalog = ChannelCatalog::new(
            identity,
            &config.mqtt.topic_root,
            &config.mqtt.discovery_prefix,
            config.mqtt.qos,
        );

        let clock = config
            .features
            .clock_sync
            .then(|| ClockReconciler::new(connector.clone()));
        let exporter = config.features.csv_export.clone().map(CsvExporter::new);

        Self {
            bus,
            connect_rx,
            catalog,
            runner: SessionRunner::new(connector),
            clock,
            exporter,
        }
    }

    /// Run until a termination signal arrives.
    ///
    /// The signal listener is armed before the loop starts, so a signal
    /// delivered while a slow poll cycle is in flight still stops the loop
    /// on the next iteration.
    pub async fn run(self) {
        let shutdown = async {
            // A failed listener is treated as a shutdown request rather
            // than leaving the process without a signal path.
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for shutdown signal");
            }
        };
        self.run_until(shutdown).await;
    }

    /// Run until `shutdown` completes. An in-flight cycle finishes before
    /// the loop exits.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("bridge running, poll cadence aligned to the minute boundary");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("received shutdown signal");
                    break;
                }
                Some(()) = self.connect_rx.recv() => {
                    self.publish_catalog().await;
                }
                () = sleep_to_minute_boundary() => {
                    self.tick().await;
                }
            }
        }

        self.bus.shutdown().await;
        info!("bridge stopped");
    }

    /// Publish the retained "online" liveness message followed by the full
    /// discovery catalog. Idempotent by construction of the catalog.
    async fn publish_catalog(&self) {
        info!("publishing liveness and discovery catalog");

        if let Err(err) = self.bus.publish_online().await {
            warn!(error = %err, "failed to publish online state");
            return;
        }

        for (topic, payload) in self.catalog.config_messages() {
            if let Err(err) = self.bus.publish(&topic, payload.into_bytes(), true).await {
                warn!(topic, error = %err, "failed to publish discovery config");
            }
        }
    }

    /// One scheduler tick: poll and publish when connected, and always give
    /// the clock reconciler a chance to run.
    async fn tick(&mut self) {
        if self.bus.is_connected() {
            match self.runner.poll().await {
                Ok(values) => {
                    match serde_json::to_string(&values) {
                        Ok(json) => {
                            let topic = self.bus.topics().values.clone();
                            if let Err(err) = self.bus.publish(&topic, json.into_bytes(), false).await
                            {
                                warn!(error = %err, "failed to publish values");
                            }
                        }
                        Err(err) => error!(error = %err, "failed to encode value map"),
                    }

                    if let Some(exporter) = &self.exporter {
                        exporter.append(Local::now().naive_local(), &values);
                    }
                }
                Err(err) => {
                    // Device-transient: skip this cycle, the next tick retries.
                    error!(error = %err, "poll cycle failed");
                }
            }
        } else {
            debug!("bus not connected, skipping poll cycle");
        }

        if let Some(clock) = &mut self.clock {
            clock.reconcile_if_due(Local::now().naive_local()).await;
        }
    }
}

/// Sleep until the next wall-clock minute boundary. Computing the deadline
/// from the clock (instead of a constant 60-second sleep from loop start)
/// keeps the cadence phase-aligned across slow poll cycles.
async fn sleep_to_minute_boundary() {
    tokio::time::sleep(time_to_minute_boundary(Local::now().naive_local())).await;
}

fn time_to_minute_boundary(now: NaiveDateTime) -> Duration {
    let millis_into_minute =
        u64::from(now.second()) * 1000 + u64::from(now.nanosecond() / 1_000_000).min(999);
    Duration::from_millis(60_000 - millis_into_minute.min(59_999))
}
