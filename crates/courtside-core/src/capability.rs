//! Device audio capability monitoring
//!
//! Device events from the host audio subsystem are forwarded over a channel
//! to a single task. Each "device connected" event triggers a configuration
//! fetch; the resulting format list is fed to the [`TrackSelector`], and only
//! its decision touches the engine.

use crate::selector::{QualityController, SelectionOutcome, TrackSelector};
use crate::types::*;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Callback the host audio subsystem invokes for device events
pub type DeviceEventCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Host audio subsystem
#[async_trait]
pub trait AudioCapabilityProvider: Send + Sync {
    /// Playback configurations `device` supports for streams with `attributes`
    async fn supported_configurations(
        &self,
        attributes: &AudioAttributes,
        device: &AudioDevice,
    ) -> Result<Vec<AudioConfig>>;

    async fn register_device_observer(&self, callback: DeviceEventCallback) -> Result<()>;

    async fn unregister_device_observer(&self) -> Result<()>;
}

struct MonitorInner {
    provider: Arc<dyn AudioCapabilityProvider>,
    controller: Arc<dyn QualityController>,
    selector: TrackSelector,
    attributes: AudioAttributes,
    capability: watch::Sender<DeviceAudioCapability>,
    alive: AtomicBool,
}

impl MonitorInner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn handle_event(&self, event: DeviceEvent) {
        if event.kind != DeviceEventKind::DeviceStateUpdate {
            return;
        }

        self.capability.send_modify(|cap| cap.last_event = Some(event.clone()));

        if event.connected {
            info!(device = %event.device, "Audio device connected");
            self.refresh(event.device).await;
        }
    }

    async fn refresh(&self, device: AudioDevice) -> Option<SelectionOutcome> {
        if !self.is_alive() {
            return None;
        }

        let configurations = match self
            .provider
            .supported_configurations(&self.attributes, &device)
            .await
        {
            Ok(configurations) => configurations,
            Err(e) => {
                let err = Error::CapabilityFetch {
                    device: device.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, code = err.error_code(), "Capability fetch failed");
                return None;
            }
        };

        // The monitor may have been torn down while the fetch was in flight.
        if !self.is_alive() {
            debug!(device = %device, "Discarding capability update after teardown");
            return None;
        }

        let formats: Vec<AudioSampleFormat> = configurations.iter().map(|c| c.format).collect();
        debug!(device = %device, formats = ?formats, "Audio capabilities updated");

        self.capability.send_modify(|cap| {
            cap.current_device = device;
            cap.supported_configurations = Some(configurations);
            cap.supported_formats = formats.clone();
        });

        Some(self.selector.run(self.controller.as_ref(), &formats))
    }
}

/// Tracks the current audio sink capability and drives variant selection
pub struct DeviceCapabilityMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceCapabilityMonitor {
    pub fn new(
        provider: Arc<dyn AudioCapabilityProvider>,
        controller: Arc<dyn QualityController>,
        selector: TrackSelector,
    ) -> Self {
        let (capability, _) = watch::channel(DeviceAudioCapability::default());

        Self {
            inner: Arc::new(MonitorInner {
                provider,
                controller,
                selector,
                attributes: AudioAttributes::default(),
                capability,
                alive: AtomicBool::new(true),
            }),
            task: Mutex::new(None),
        }
    }

    /// Register for device events and start processing them. A torn down
    /// monitor stays down and returns [`Error::Destroyed`].
    #[instrument(skip(self))]
    pub async fn mount(&self) -> Result<()> {
        if !self.inner.is_alive() {
            warn!("Mount after teardown ignored");
            return Err(Error::Destroyed);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DeviceEvent>();

        let callback: DeviceEventCallback = Arc::new(move |event: DeviceEvent| {
            let _ = tx.send(event);
        });
        self.inner.provider.register_device_observer(callback).await?;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !inner.is_alive() {
                    break;
                }
                inner.handle_event(event).await;
            }
        });

        if let Ok(mut task) = self.task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }

        info!("Device capability monitor mounted");
        Ok(())
    }

    /// Fetch configurations for `device` and re-run selection.
    ///
    /// Returns `None` when the fetch failed or the monitor was torn down;
    /// the next device event or manual call is the retry path.
    #[instrument(skip(self))]
    pub async fn update_audio_capabilities_for_device(&self, device: AudioDevice) -> Option<SelectionOutcome> {
        self.inner.refresh(device).await
    }

    /// Re-run selection against the last known formats, e.g. after the
    /// variant list changed
    pub fn reselect(&self) -> Option<SelectionOutcome> {
        if !self.inner.is_alive() {
            return None;
        }
        let formats = self.inner.capability.borrow().supported_formats.clone();
        Some(self.inner.selector.run(self.inner.controller.as_ref(), &formats))
    }

    /// Current capability snapshot
    pub fn capability(&self) -> DeviceAudioCapability {
        self.inner.capability.borrow().clone()
    }

    /// Subscribe to capability changes
    pub fn subscribe(&self) -> watch::Receiver<DeviceAudioCapability> {
        self.inner.capability.subscribe()
    }

    /// Stop processing events and unregister the observer
    #[instrument(skip(self))]
    pub async fn teardown(&self) {
        if !self.inner.alive.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.inner.provider.unregister_device_observer().await {
            warn!(error = %e, "Failed to unregister device observer");
        }

        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }

        info!("Device capability monitor torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::BASELINE_AAC;
    use crate::sim::{SimulatedAudioDevice, StaticQualities};
    use std::time::Duration;

    fn monitor_with(device: Arc<SimulatedAudioDevice>, controller: Arc<StaticQualities>) -> DeviceCapabilityMonitor {
        DeviceCapabilityMonitor::new(device, controller, TrackSelector::default())
    }

    #[tokio::test]
    async fn test_manual_refresh_updates_state_and_selects() {
        let device = Arc::new(SimulatedAudioDevice::new());
        device.set_configurations(&AudioDevice::default(), vec![AudioConfig::new(AudioSampleFormat::Pcm16)]);
        let controller = Arc::new(StaticQualities::new(vec![
            Variant::new(1, 500).with_audio_codec(BASELINE_AAC).activated(),
            Variant::new(2, 900).with_audio_codec(BASELINE_AAC),
        ]));
        let monitor = monitor_with(device, controller.clone());

        let outcome = monitor
            .update_audio_capabilities_for_device(AudioDevice::default())
            .await
            .unwrap();
        assert!(outcome.switched);
        assert_eq!(controller.switches(), vec![VariantToken(2)]);
        assert_eq!(monitor.capability().supported_formats, vec![AudioSampleFormat::Pcm16]);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_contained() {
        let device = Arc::new(SimulatedAudioDevice::new());
        let controller = Arc::new(StaticQualities::new(vec![]));
        let monitor = monitor_with(device.clone(), controller);

        device.fail_next_fetch();
        assert!(monitor
            .update_audio_capabilities_for_device(AudioDevice::new("hdmi"))
            .await
            .is_none());
        assert!(monitor.capability().supported_configurations.is_none());
    }

    #[tokio::test]
    async fn test_device_events_drive_selection() {
        let device = Arc::new(SimulatedAudioDevice::new());
        let hdmi = AudioDevice::new("hdmi");
        device.set_configurations(&hdmi, vec![AudioConfig::new(AudioSampleFormat::Pcm24)]);
        let controller = Arc::new(StaticQualities::new(vec![
            Variant::new(1, 2000).with_audio_codec(BASELINE_AAC).activated(),
            Variant::new(2, 1200).with_audio_codec(crate::selector::HE_AAC),
        ]));
        let monitor = monitor_with(device.clone(), controller.clone());
        monitor.mount().await.unwrap();

        device.emit(DeviceEvent {
            kind: DeviceEventKind::DeviceStateUpdate,
            device: hdmi.clone(),
            connected: true,
        });

        tokio::time::timeout(Duration::from_secs(1), async {
            while controller.switches().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(controller.switches(), vec![VariantToken(2)]);
        let capability = monitor.capability();
        assert_eq!(capability.current_device, hdmi);
        assert!(capability.last_event.is_some_and(|e| e.connected));

        monitor.teardown().await;
        assert!(!device.has_observer());
    }

    #[tokio::test]
    async fn test_no_updates_after_teardown() {
        let device = Arc::new(SimulatedAudioDevice::new());
        device.set_configurations(&AudioDevice::default(), vec![AudioConfig::new(AudioSampleFormat::Pcm16)]);
        let controller = Arc::new(StaticQualities::new(vec![Variant::new(1, 100).with_audio_codec(BASELINE_AAC)]));
        let monitor = monitor_with(device, controller.clone());

        monitor.teardown().await;
        assert!(monitor
            .update_audio_capabilities_for_device(AudioDevice::default())
            .await
            .is_none());
        assert!(monitor.reselect().is_none());
        assert!(controller.switches().is_empty());
    }

    #[tokio::test]
    async fn test_mount_after_teardown_stays_down() {
        let device = Arc::new(SimulatedAudioDevice::new());
        let controller = Arc::new(StaticQualities::new(vec![Variant::new(1, 100).with_audio_codec(BASELINE_AAC)]));
        let monitor = monitor_with(device.clone(), controller);

        monitor.mount().await.unwrap();
        monitor.teardown().await;
        assert!(!device.has_observer());

        assert!(matches!(monitor.mount().await, Err(Error::Destroyed)));
        assert!(!device.has_observer());
        assert!(!device.emit(DeviceEvent {
            kind: DeviceEventKind::DeviceStateUpdate,
            device: AudioDevice::default(),
            connected: true,
        }));
    }

    #[tokio::test]
    async fn test_in_flight_fetch_discarded_after_teardown() {
        let device = Arc::new(SimulatedAudioDevice::new());
        device.set_configurations(&AudioDevice::default(), vec![AudioConfig::new(AudioSampleFormat::Pcm16)]);
        device.set_fetch_delay(Duration::from_millis(50));
        let controller = Arc::new(StaticQualities::new(vec![Variant::new(1, 100).with_audio_codec(BASELINE_AAC)]));
        let monitor = Arc::new(monitor_with(device, controller.clone()));

        let pending = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.update_audio_capabilities_for_device(AudioDevice::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.teardown().await;

        assert!(pending.await.unwrap().is_none());
        assert!(monitor.capability().supported_formats.is_empty());
        assert!(controller.switches().is_empty());
    }
}
