//! Integration tests for the control loop
//!
//! Each test runs a real [`ControlLoop`] over a [`SimulatedFarm`] and a
//! scripted advisor, driving ticks explicitly. Scenarios:
//! - End-to-end advice application
//! - User precedence over in-flight and later advice
//! - Degraded sensing
//! - Hysteresis under sensor noise
//! - Actuator retry and fault
//! - Stale and paused recommendations
//! - Override clearing, questions, shutdown

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_test::{assert_err, assert_ok};

use common::{fan, speed, test_config, Harness, ScriptedAdvisor};
use farm_control_core::{
    ActuatorKind, ActuatorTarget, AdvisoryFailure, CommandError, CommandSource, ControlConfig, ControlDeps,
    ControlError, ControlLoop, ControlMessage, DiscardReason, LoopState, NotifyLevel, ObserverSet, Recommendation,
    RecommendationError, SimulatedFarm,
};

fn confirmed(target: ActuatorTarget) -> impl Fn(&ControlMessage) -> bool {
    move |m| matches!(m, ControlMessage::ActuatorConfirmed { target: t } if *t == target)
}

fn requested(kind: ActuatorKind) -> impl Fn(&ControlMessage) -> bool {
    move |m| matches!(m, ControlMessage::RecommendationRequested { kind: k, .. } if *k == kind)
}

fn fan_target(pct: u8) -> ActuatorTarget {
    ActuatorTarget::Fan(speed(pct))
}

// =============================================================================
// Advice application
// =============================================================================

#[tokio::test]
async fn test_hot_humid_low_oxygen_drives_fan_to_90() {
    let farm = SimulatedFarm::new();
    farm.set_conditions(30.0, 75.0, 85.0, 5_000.0);
    let mut h = Harness::start(farm, ScriptedAdvisor::new());

    h.wait_for("fan confirmed at 90%", confirmed(fan_target(90))).await;

    let snapshot = h.settle().await;
    assert_eq!(snapshot.actuators.command.fan_speed, speed(90));
    assert!(snapshot.actuators.confirmed.fan);
    assert_eq!(snapshot.sources.fan, CommandSource::Ai);
    let record = snapshot.recommendations.fan.expect("stored recommendation");
    assert_eq!(record.based_on.temperature_celsius, 30.0);
    assert_eq!(h.farm.writes_for(ActuatorKind::Fan), vec![fan_target(90)]);
    h.stop().await;
}

#[tokio::test]
async fn test_noise_within_hysteresis_writes_once() {
    let farm = SimulatedFarm::new();
    let advisor = ScriptedAdvisor::new();
    advisor.set_fan_policy(|_| Ok(fan(65)));
    let mut h = Harness::start(farm, advisor);
    h.wait_for("fan confirmed at 65%", confirmed(fan_target(65))).await;

    for wobble in [0.3, -0.2, 0.4, -0.4, 0.1] {
        h.farm
            .set_conditions(25.0 + wobble, 60.0 - wobble, 95.0 + wobble, 5_000.0 + wobble * 100.0);
        assert_ok!(h.handle.tick_now().await);
    }
    let snapshot = h.settle().await;

    assert_eq!(h.advisor.calls(ActuatorKind::Fan), 1);
    assert_eq!(h.count(requested(ActuatorKind::Fan)), 1);
    assert_eq!(h.farm.writes_for(ActuatorKind::Fan), vec![fan_target(65)]);
    assert_eq!(snapshot.actuators.command.fan_speed, speed(65));
    assert!(snapshot.actuators.confirmed.fan);
    h.stop().await;
}

#[tokio::test]
async fn test_light_follows_low_light_advice() {
    let farm = SimulatedFarm::new();
    farm.set_conditions(22.0, 60.0, 95.0, 300.0);
    farm.set_devices(speed(40), false);
    let mut h = Harness::start(farm, ScriptedAdvisor::new());

    h.wait_for("lights confirmed on", confirmed(ActuatorTarget::Light(true))).await;

    assert!(h.farm.light_on());
    assert_eq!(h.settle().await.sources.light, CommandSource::Ai);
    h.stop().await;
}

// =============================================================================
// User precedence
// =============================================================================

#[tokio::test]
async fn test_user_command_wins_over_in_flight_recommendation() {
    let farm = SimulatedFarm::new();
    farm.set_conditions(30.0, 75.0, 85.0, 5_000.0);
    let advisor = ScriptedAdvisor::new();
    advisor.hold(ActuatorKind::Fan);
    let mut h = Harness::start(farm, advisor);

    h.wait_for("fan recommendation requested", requested(ActuatorKind::Fan))
        .await;
    assert_ok!(h.handle.set_fan_speed(40).await);
    h.wait_for("fan confirmed at 40%", confirmed(fan_target(40))).await;

    h.advisor.release(ActuatorKind::Fan, 1);
    let received = h
        .wait_for("fan recommendation received", |m| {
            matches!(m, ControlMessage::RecommendationReceived { recommendation: Recommendation::Fan(_), .. })
        })
        .await;
    assert!(matches!(received, ControlMessage::RecommendationReceived { applied: false, .. }));

    let snapshot = h.settle().await;
    assert_eq!(snapshot.sources.fan, CommandSource::User);
    assert_eq!(snapshot.actuators.command.fan_speed, speed(40));
    let record = snapshot.recommendations.fan.expect("stored for display");
    assert_eq!(record.recommendation.target(), fan_target(90));
    assert_eq!(h.farm.writes_for(ActuatorKind::Fan), vec![fan_target(40)]);
    h.stop().await;
}

#[tokio::test]
async fn test_advice_during_override_is_display_only() {
    let mut h = Harness::start(SimulatedFarm::new(), ScriptedAdvisor::new());
    h.wait_for("fan confirmed at 40%", confirmed(fan_target(40))).await;

    assert_ok!(h.handle.set_fan_speed(20).await);
    h.wait_for("fan confirmed at 20%", confirmed(fan_target(20))).await;

    h.farm.set_conditions(30.0, 75.0, 85.0, 5_000.0);
    assert_ok!(h.handle.tick_now().await);
    h.wait_for("advice kept for display", |m| {
        matches!(
            m,
            ControlMessage::RecommendationReceived { recommendation: Recommendation::Fan(_), applied: false }
        )
    })
    .await;

    let snapshot = h.settle().await;
    assert_eq!(snapshot.sources.fan, CommandSource::User);
    assert_eq!(snapshot.actuators.command.fan_speed, speed(20));
    assert_eq!(h.farm.writes_for(ActuatorKind::Fan), vec![fan_target(40), fan_target(20)]);
    h.stop().await;
}

#[tokio::test]
async fn test_clear_override_returns_control_to_advisor() {
    let advisor = ScriptedAdvisor::new();
    advisor.set_fan_policy(|_| Ok(fan(65)));
    let mut h = Harness::start(SimulatedFarm::new(), advisor);
    h.wait_for("fan confirmed at 65%", confirmed(fan_target(65))).await;

    assert_ok!(h.handle.set_fan_speed(30).await);
    h.wait_for("fan confirmed at 30%", confirmed(fan_target(30))).await;
    assert_ok!(h.handle.clear_override(ActuatorKind::Fan).await);

    h.wait_for("advisor write", |m| {
        matches!(
            m,
            ControlMessage::CommandIssued { target, source: CommandSource::Ai } if *target == fan_target(65)
        )
    })
    .await;
    let snapshot = h.settle().await;
    assert_eq!(snapshot.sources.fan, CommandSource::Ai);
    assert_eq!(snapshot.actuators.command.fan_speed, speed(65));
    assert!(snapshot.actuators.confirmed.fan);
    h.stop().await;
}

#[tokio::test]
async fn test_out_of_range_fan_speed_rejected() {
    let advisor = ScriptedAdvisor::new();
    advisor.hold_all();
    let mut h = Harness::start(SimulatedFarm::new(), advisor);

    let result = h.handle.set_fan_speed(140).await;
    assert!(matches!(
        result,
        Err(ControlError::Command(CommandError::FanSpeedOutOfRange(140)))
    ));
    assert_err!(h.handle.set_fan_speed(-1).await);

    h.settle().await;
    assert!(h.farm.write_log().is_empty());
    h.stop().await;
}

// =============================================================================
// Degraded sensing
// =============================================================================

#[tokio::test]
async fn test_degraded_after_three_failures_then_recovers() {
    let farm = SimulatedFarm::new();
    farm.fail_sensor_reads(3);
    let mut h = Harness::start(farm, ScriptedAdvisor::new());

    assert_ok!(h.handle.tick_now().await);
    assert_ok!(h.handle.tick_now().await);
    h.wait_for("degraded", |m| matches!(m, ControlMessage::DegradedChanged { degraded: true }))
        .await;

    assert_ok!(h.handle.refresh_recommendation(ActuatorKind::Fan).await);
    let snapshot = h.settle().await;
    assert!(snapshot.degraded);
    assert_eq!(snapshot.consecutive_sensor_failures, 3);
    assert_eq!(h.count(requested(ActuatorKind::Fan)), 0);
    assert_eq!(h.advisor.calls(ActuatorKind::Fan), 0);

    // Manual control stays available
    assert_ok!(h.handle.set_fan_speed(30).await);
    h.wait_for("fan confirmed at 30%", confirmed(fan_target(30))).await;

    assert_ok!(h.handle.tick_now().await);
    h.wait_for("recovered", |m| matches!(m, ControlMessage::DegradedChanged { degraded: false }))
        .await;
    h.wait_for("fan recommendation requested", requested(ActuatorKind::Fan))
        .await;
    h.stop().await;
}

// =============================================================================
// Actuator writes
// =============================================================================

#[tokio::test]
async fn test_write_retried_once_then_confirmed() {
    let farm = SimulatedFarm::new();
    farm.fail_writes(ActuatorKind::Fan, 1);
    let advisor = ScriptedAdvisor::new();
    advisor.hold_all();
    let mut h = Harness::start(farm, advisor);

    assert_ok!(h.handle.set_fan_speed(70).await);
    h.wait_for("fan confirmed at 70%", confirmed(fan_target(70))).await;

    let snapshot = h.settle().await;
    assert!(!snapshot.faulted.fan);
    assert_eq!(h.farm.writes_for(ActuatorKind::Fan), vec![fan_target(70), fan_target(70)]);
    h.stop().await;
}

#[tokio::test]
async fn test_write_failing_after_retry_faults() {
    let farm = SimulatedFarm::new();
    farm.fail_writes(ActuatorKind::Fan, 2);
    let advisor = ScriptedAdvisor::new();
    advisor.hold_all();
    let mut h = Harness::start(farm, advisor);

    assert_ok!(h.handle.set_fan_speed(70).await);
    h.wait_for("fan faulted", |m| matches!(m, ControlMessage::ActuatorFaulted { .. }))
        .await;
    h.wait_for("error toast", |m| {
        matches!(m, ControlMessage::Notify { level: NotifyLevel::Error, .. })
    })
    .await;

    let snapshot = h.settle().await;
    assert!(snapshot.faulted.fan);
    assert!(!snapshot.actuators.confirmed.fan);
    assert_eq!(snapshot.actuators.command.fan_speed, speed(70));
    assert_eq!(h.farm.fan(), speed(50));
    h.stop().await;
}

#[tokio::test]
async fn test_acknowledge_confirms_lagging_device() {
    let farm = SimulatedFarm::new();
    farm.ignore_writes(ActuatorKind::Light, true);
    let advisor = ScriptedAdvisor::new();
    advisor.hold_all();
    let mut h = Harness::start(farm, advisor);

    assert_ok!(h.handle.set_light(false).await);
    let snapshot = h.settle().await;
    assert!(!snapshot.actuators.confirmed.light);

    assert_ok!(h.handle.acknowledge(ActuatorTarget::Light(false)).await);
    h.wait_for("light confirmed off", confirmed(ActuatorTarget::Light(false)))
        .await;
    h.stop().await;
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn test_stale_recommendation_discarded() {
    let advisor = ScriptedAdvisor::new();
    advisor.hold(ActuatorKind::Fan);
    let mut h = Harness::start(SimulatedFarm::new(), advisor);
    h.wait_for("first fan request", requested(ActuatorKind::Fan)).await;

    h.farm.set_conditions(30.0, 75.0, 85.0, 5_000.0);
    assert_ok!(h.handle.tick_now().await);
    h.wait_for("second fan request", requested(ActuatorKind::Fan)).await;

    h.advisor.release(ActuatorKind::Fan, 2);
    h.wait_until("stale discard and fresh confirmation", |log| {
        log.iter().any(|m| {
            matches!(
                m,
                ControlMessage::RecommendationDiscarded { kind: ActuatorKind::Fan, reason: DiscardReason::Stale }
            )
        }) && log.iter().any(confirmed(fan_target(90)))
    })
    .await;

    h.settle().await;
    assert_eq!(h.farm.writes_for(ActuatorKind::Fan), vec![fan_target(90)]);
    h.stop().await;
}

#[tokio::test]
async fn test_pause_discards_in_flight_advice() {
    let advisor = ScriptedAdvisor::new();
    advisor.hold(ActuatorKind::Fan);
    let mut h = Harness::start(SimulatedFarm::new(), advisor);
    h.wait_for("fan request", requested(ActuatorKind::Fan)).await;

    assert_ok!(h.handle.pause().await);
    h.wait_for("paused", |m| matches!(m, ControlMessage::LoopState { state: LoopState::Paused }))
        .await;
    h.advisor.release(ActuatorKind::Fan, 1);
    h.wait_for("paused discard", |m| {
        matches!(m, ControlMessage::RecommendationDiscarded { reason: DiscardReason::Paused, .. })
    })
    .await;

    assert_ok!(h.handle.set_fan_speed(20).await);
    h.wait_for("fan confirmed at 20%", confirmed(fan_target(20))).await;
    assert_eq!(h.farm.writes_for(ActuatorKind::Fan), vec![fan_target(20)]);

    assert_ok!(h.handle.resume().await);
    h.wait_for("fresh fan request after resume", requested(ActuatorKind::Fan))
        .await;
    h.stop().await;
}

// =============================================================================
// Advisory failures and questions
// =============================================================================

#[tokio::test]
async fn test_invalid_recommendation_leaves_fan_alone() {
    let advisor = ScriptedAdvisor::new();
    advisor.set_fan_policy(|_| Err(RecommendationError::Invalid("speed 140 out of range".into())));
    let mut h = Harness::start(SimulatedFarm::new(), advisor);

    h.wait_for("fan failure", |m| {
        matches!(
            m,
            ControlMessage::RecommendationFailed { kind: ActuatorKind::Fan, failure: AdvisoryFailure::Invalid, .. }
        )
    })
    .await;

    let snapshot = h.settle().await;
    assert!(snapshot.recommendations.fan.is_none());
    assert_eq!(snapshot.actuators.command.fan_speed, speed(50));
    assert!(h.farm.writes_for(ActuatorKind::Fan).is_empty());
    h.stop().await;
}

#[tokio::test]
async fn test_hung_advisor_times_out_then_cooldown_requests_again() {
    let advisor = ScriptedAdvisor::new();
    advisor.hold(ActuatorKind::Fan);
    let config = ControlConfig {
        recommendation_timeout: Duration::from_millis(50),
        recommendation_retries: 0,
        recommendation_failure_cooldown: Duration::from_millis(500),
        ..test_config()
    };
    let mut h = Harness::start_with(SimulatedFarm::new(), advisor, config);

    h.wait_for("fan timeout", |m| {
        matches!(
            m,
            ControlMessage::RecommendationFailed { kind: ActuatorKind::Fan, failure: AdvisoryFailure::Unavailable, .. }
        )
    })
    .await;

    // Unchanged reading inside the cooldown: no new request
    assert_ok!(h.handle.tick_now().await);
    h.settle().await;
    assert_eq!(h.count(requested(ActuatorKind::Fan)), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_ok!(h.handle.tick_now().await);
    h.wait_for("fan request after cooldown", requested(ActuatorKind::Fan)).await;
    assert_eq!(h.count(requested(ActuatorKind::Fan)), 2);
    assert_eq!(h.advisor.calls(ActuatorKind::Fan), 2);
    h.stop().await;
}

#[tokio::test]
async fn test_ask_forwards_to_advisor() {
    let advisor = ScriptedAdvisor::new();
    advisor.hold_all();
    advisor.set_answer(Ok("Keep humidity between 60% and 70%.".into()));
    let h = Harness::start(SimulatedFarm::new(), advisor);

    let answer = h.handle.ask("What humidity suits lettuce?").await;
    assert_eq!(answer.unwrap(), "Keep humidity between 60% and 70%.");

    h.advisor
        .set_answer(Err(RecommendationError::Unavailable("offline".into())));
    let result = h.handle.ask("Anything?").await;
    assert!(matches!(
        result,
        Err(ControlError::Advisory(RecommendationError::Unavailable(_)))
    ));
    h.stop().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_stopped_loop_rejects_intents() {
    let advisor = ScriptedAdvisor::new();
    advisor.hold_all();
    let mut h = Harness::start(SimulatedFarm::new(), advisor);
    h.wait_for("started", |m| matches!(m, ControlMessage::Started { .. }))
        .await;

    h.control.stop().await;
    assert!(!h.control.is_running());
    h.wait_for("stopped", |m| matches!(m, ControlMessage::Stopped { .. }))
        .await;

    assert!(matches!(h.handle.snapshot().await, Err(ControlError::LoopStopped)));
    assert!(matches!(h.handle.set_light(true).await, Err(ControlError::LoopStopped)));
    assert!(h.handle.is_closed());
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let farm = std::sync::Arc::new(SimulatedFarm::new());
    let deps = ControlDeps::new(farm.clone(), farm, ScriptedAdvisor::new());
    let config = ControlConfig {
        poll_interval: Duration::ZERO,
        ..test_config()
    };

    assert!(ControlLoop::start(config, deps, ObserverSet::new()).is_err());
}
