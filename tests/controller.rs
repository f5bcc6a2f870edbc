use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Europe::Rome;
use std::sync::Arc;

use pirelay::config::Config;
use pirelay::controller::{Controller, ControllerSettings};
use pirelay::error::RelayError;
use pirelay::gpio::RecordingDriver;
use pirelay::logger::Logger;
use pirelay::relay::{RelayContext, RelayDefinition, RelayState};
use pirelay::schedule::{ScheduleEntry, SunConfig};
use pirelay::solar::{FixedSunTimes, Location};
use pirelay::time_source::ManualTimeSource;

fn start() -> DateTime<Utc> {
    Rome.with_ymd_and_hms(2024, 6, 21, 12, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn context(driver: Arc<RecordingDriver>) -> RelayContext {
    RelayContext::new(
        Arc::new(ManualTimeSource::new(start())),
        Arc::new(FixedSunTimes {
            sunrise: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            sunset: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }),
        driver,
        Logger::disabled(),
    )
}

fn settings() -> ControllerSettings {
    ControllerSettings {
        listen_addr: ":8011".to_string(),
        timezone: "Europe/Rome".to_string(),
        location: Some(Location::new(41.9, 12.5).unwrap()),
    }
}

#[test]
fn test_add_relay_rejects_duplicate_gpio_and_name() {
    let controller = Controller::new(settings(), context(Arc::new(RecordingDriver::new())));
    controller.add_relay(RelayDefinition::new(17)).unwrap();
    controller
        .add_relay(RelayDefinition::new(27).named("pump"))
        .unwrap();

    let err = controller
        .add_relay(RelayDefinition::new(17).named("other"))
        .unwrap_err();
    assert!(matches!(err, RelayError::Conflict(_)));

    // Collides with the default name of the relay on GPIO 17
    let err = controller
        .add_relay(RelayDefinition::new(4).named("GPIO17"))
        .unwrap_err();
    assert!(matches!(err, RelayError::Conflict(_)));

    let err = controller
        .add_relay(RelayDefinition::new(5).named("pump"))
        .unwrap_err();
    assert_eq!(
        err,
        RelayError::Conflict("relay named pump already exists".to_string())
    );

    assert_eq!(controller.relays().len(), 2);
    controller.shutdown();
}

#[test]
fn test_find_by_name_or_gpio() {
    let controller = Controller::new(settings(), context(Arc::new(RecordingDriver::new())));
    controller
        .add_relay(RelayDefinition::new(22).named("garden"))
        .unwrap();

    assert_eq!(controller.find("garden").map(|r| r.gpio()), Some(22));
    assert_eq!(
        controller.find("22").map(|r| r.name()),
        Some("garden".to_string())
    );
    assert!(controller.find("23").is_none());
    assert!(controller.find("porch").is_none());
    controller.shutdown();
}

#[test]
fn test_relays_inherit_controller_settings() {
    let driver = Arc::new(RecordingDriver::new());
    let controller = Controller::new(settings(), context(driver.clone()));
    let relay = controller
        .add_relay(
            RelayDefinition::new(22).with_sun(SunConfig::enabled(RelayState::On, RelayState::Off)),
        )
        .unwrap();

    assert_eq!(relay.timezone(), chrono_tz::Europe::Rome);
    assert_eq!(relay.location(), settings().location);
    // Midday with the sun up
    assert_eq!(driver.pin(22).level(), Some(true));
    controller.shutdown();
}

#[test]
fn test_from_config_and_document() {
    let config = Config {
        listen_addr: "0.0.0.0:9000".to_string(),
        location: Some(Location::new(41.9, 12.5).unwrap()),
        timezone: "Europe/Rome".to_string(),
        relays: vec![
            RelayDefinition::new(17).named("garden").with_schedule(
                ScheduleEntry::new("evening", TimeDelta::minutes(18 * 60 + 30), RelayState::On)
                    .held_for(TimeDelta::hours(2)),
            ),
            RelayDefinition::new(27).with_state(RelayState::On),
        ],
    };

    let driver = Arc::new(RecordingDriver::new());
    let controller = Controller::from_config(&config, context(driver.clone())).unwrap();
    assert_eq!(controller.settings(), &ControllerSettings::from(&config));
    assert_eq!(driver.pin(27).writes(), vec![true]);

    let document = controller.document();
    assert_eq!(document.listen_addr, "0.0.0.0:9000");
    assert_eq!(document.relays.len(), 2);
    assert_eq!(document.relays[0].schedules, config.relays[0].schedules);
    assert_eq!(document.relays[1].name, "GPIO27");
    assert_eq!(document.relays[1].state, RelayState::On);

    let json: serde_json::Value = serde_json::from_str(&document.to_json().unwrap()).unwrap();
    assert_eq!(json["location"], serde_json::json!([41.9, 12.5]));
    assert_eq!(json["relays"][0]["schedules"][0]["at"], "18h30m0s");
    controller.shutdown();
}

#[test]
fn test_from_config_fails_on_invalid_relay() {
    let config = Config {
        listen_addr: ":8011".to_string(),
        location: None,
        timezone: "Europe/Rome".to_string(),
        relays: vec![
            RelayDefinition::new(17),
            RelayDefinition::new(22).with_sun(SunConfig::enabled(RelayState::On, RelayState::Off)),
        ],
    };

    let result = Controller::from_config(&config, context(Arc::new(RecordingDriver::new())));
    assert!(matches!(result, Err(RelayError::InvalidConfiguration(_))));
}
