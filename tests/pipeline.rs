//! End-to-end runs of the sender and receiver domains over the loopback radio.

use std::time::Duration;

use motion_balance_rs::compensation::{CompensationEngine, RenderHandle};
use motion_balance_rs::error::LinkError;
use motion_balance_rs::safety::{LogFeedbackSink, SafetyMonitor};
use motion_balance_rs::sampler::MotionSampler;
use motion_balance_rs::settings::{FilterSettings, PipelineConfig};
use motion_balance_rs::sim::{FrameCounter, LoopbackControl, LoopbackRadio, SimulatedSensor};
use motion_balance_rs::transport::{
    AdapterState, Advertiser, ConnectionState, LinkHandle, Scanner, TokioScheduler,
};
use motion_balance_rs::types::ScreenBounds;
use tokio::sync::watch;
use tokio::time::timeout;

struct Rig {
    sampler: MotionSampler,
    sender: LinkHandle,
    receiver: LinkHandle,
    render: RenderHandle,
    frames: FrameCounter,
    control: LoopbackControl,
}

impl Rig {
    fn build(prepare: impl FnOnce(&LoopbackControl)) -> Self {
        let config = PipelineConfig::default();
        let settings = FilterSettings::default();
        let radio = LoopbackRadio::pair();
        prepare(&radio.control);

        let sampler = MotionSampler::new(Box::new(SimulatedSensor::new(5)), settings.clone(), &config)
            .with_safety(SafetyMonitor::new(&config, Box::new(LogFeedbackSink)));

        let (sched, timers) = TokioScheduler::channel();
        let sender = LinkHandle::spawn(
            Advertiser::new(radio.peripheral, sched, &config),
            radio.peripheral_events,
            timers,
            Some(sampler.samples()),
        );
        let (sched, timers) = TokioScheduler::channel();
        let receiver = LinkHandle::spawn(
            Scanner::new(radio.central, sched, &config),
            radio.central_events,
            timers,
            None,
        );

        let frames = FrameCounter::new();
        let engine = CompensationEngine::new(
            settings,
            ScreenBounds::new(1280.0, 720.0).unwrap(),
            config.velocity_gain,
            11,
        );
        let render = RenderHandle::spawn(
            engine,
            receiver.inbound(),
            Box::new(frames.clone()),
            config.render_interval,
        );

        Rig {
            sampler,
            sender,
            receiver,
            render,
            frames,
            control: radio.control,
        }
    }

    async fn shutdown(&mut self) {
        self.sampler.stop().await;
        self.sender.shutdown().await;
        self.receiver.shutdown().await;
        self.render.shutdown().await;
    }
}

async fn reach<T>(rx: &mut watch::Receiver<T>, what: &str, pred: impl FnMut(&T) -> bool) {
    timeout(Duration::from_secs(120), rx.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        .unwrap_or_else(|_| panic!("channel closed waiting for {}", what));
}

#[tokio::test(start_paused = true)]
async fn test_samples_flow_end_to_end() {
    let mut rig = Rig::build(|_| {});
    rig.sampler.start().unwrap();

    let mut receiver_state = rig.receiver.state();
    reach(&mut receiver_state, "receiver connected", |s| *s == ConnectionState::Connected).await;
    let mut sender_state = rig.sender.state();
    reach(&mut sender_state, "sender connected", |s| *s == ConnectionState::Connected).await;

    let mut snapshot = rig.render.snapshot();
    reach(&mut snapshot, "samples applied", |s| s.samples_applied >= 30).await;

    let mut sent = rig.sender.stats();
    reach(&mut sent, "frames sent", |s| s.sent >= 30).await;
    let received = *rig.receiver.stats().borrow();
    assert!(received.received > 0);
    assert_eq!(received.malformed, 0);

    let snap = *snapshot.borrow();
    assert_eq!(snap.marker_count, 100);
    assert!(snap.target_velocity[0].abs() <= 50.0);

    let frames = rig.frames.stats();
    assert!(frames.frames > 0);
    assert_eq!(frames.markers, 100);
    assert!((0.0..1280.0).contains(&frames.centroid[0]));
    assert!((0.0..720.0).contains(&frames.centroid[1]));

    rig.shutdown().await;
    assert!(!rig.control.is_connected());
    assert_eq!(*rig.sender.state().borrow(), ConnectionState::Idle);
    assert_eq!(*rig.receiver.state().borrow(), ConnectionState::Idle);

    // Nothing fires after teardown
    let after = rig.frames.stats();
    let published = rig.sampler.stats().published;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(rig.frames.stats(), after);
    assert_eq!(rig.sampler.stats().published, published);
    assert!(!rig.sampler.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_link_drop_recovers() {
    let mut rig = Rig::build(|_| {});
    rig.sampler.start().unwrap();

    let mut receiver_state = rig.receiver.state();
    reach(&mut receiver_state, "connected", |s| *s == ConnectionState::Connected).await;

    rig.control.drop_link("out of range");
    reach(&mut receiver_state, "dropped", |s| *s == ConnectionState::Idle).await;
    assert_eq!(
        *rig.receiver.last_error().borrow(),
        Some(LinkError::DisconnectedUnexpectedly("out of range".into()))
    );

    // Reconnect after the fixed delay
    reach(&mut receiver_state, "reconnected", |s| *s == ConnectionState::Connected).await;
    let mut sender_state = rig.sender.state();
    reach(&mut sender_state, "sender reconnected", |s| *s == ConnectionState::Connected).await;

    let before = rig.receiver.stats().borrow().received;
    let mut stats = rig.receiver.stats();
    reach(&mut stats, "traffic resumed", |s| s.received > before + 10).await;

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_advertising_failures_are_terminal() {
    let mut rig = Rig::build(|control| control.fail_advertising(3));
    rig.sampler.start().unwrap();

    let mut error = rig.sender.last_error();
    reach(&mut error, "terminal error", |e| e.is_some()).await;
    assert_eq!(
        *error.borrow(),
        Some(LinkError::RetriesExhausted {
            operation: "advertising",
            attempts: 3
        })
    );

    // Scanner keeps looking, nothing ever connects
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(*rig.sender.state().borrow(), ConnectionState::Idle);
    assert_eq!(*rig.receiver.state().borrow(), ConnectionState::Scanning);
    assert!(!rig.control.is_connected());

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_adapter_power_off_surfaces_link_unavailable() {
    let mut rig = Rig::build(|_| {});
    rig.sampler.start().unwrap();

    let mut receiver_state = rig.receiver.state();
    reach(&mut receiver_state, "connected", |s| *s == ConnectionState::Connected).await;

    rig.control.set_central_state(AdapterState::PoweredOff);
    let mut error = rig.receiver.last_error();
    reach(&mut error, "link unavailable", |e| {
        *e == Some(LinkError::LinkUnavailable(AdapterState::PoweredOff))
    })
    .await;
    assert_eq!(*rig.receiver.state().borrow(), ConnectionState::Idle);

    // Not retried without outside intervention
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(*rig.receiver.state().borrow(), ConnectionState::Idle);

    rig.control.set_central_state(AdapterState::PoweredOn);
    reach(&mut receiver_state, "back up", |s| *s == ConnectionState::Connected).await;

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_is_retried() {
    let mut rig = Rig::build(|_| {});
    rig.sampler.start().unwrap();

    let mut sender_state = rig.sender.state();
    reach(&mut sender_state, "connected", |s| *s == ConnectionState::Connected).await;

    rig.control.fill_queue(5);
    let mut stats = rig.sender.stats();
    reach(&mut stats, "retries", |s| s.send_retries > 0).await;
    let sent = stats.borrow().sent;
    reach(&mut stats, "sending again", |s| s.sent > sent + 10).await;
    assert_eq!(stats.borrow().dropped, 0);

    rig.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_sender_link_releases_radio() {
    let Rig {
        mut sampler,
        sender,
        mut receiver,
        mut render,
        control,
        ..
    } = Rig::build(|_| {});
    sampler.start().unwrap();

    let mut receiver_state = receiver.state();
    reach(&mut receiver_state, "connected", |s| *s == ConnectionState::Connected).await;

    // No explicit shutdown
    drop(sender);
    reach(&mut receiver_state, "peer gone", |s| *s != ConnectionState::Connected).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!control.is_connected());
    assert_eq!(*receiver_state.borrow(), ConnectionState::Scanning);

    sampler.stop().await;
    receiver.shutdown().await;
    render.shutdown().await;
}
