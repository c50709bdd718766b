//! Timer 与 Cron 单元测试

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};

use crate::runtime::bridge::{BridgeConfig, EventBridge};
use crate::runtime::session::{Callback, NativeSession};
use crate::runtime::timer::{
    parse_duration, CalendarSchedule, CronError, CronSchedule, SourceKind, TimerError, Timers,
};
use crate::runtime::value::Value;

fn utc(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .unwrap()
}

fn next(
    expr: &str,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    CronSchedule::parse(expr).unwrap().next_after(after)
}

fn timers() -> Timers {
    Timers::new(Arc::new(EventBridge::with_config(BridgeConfig {
        capacity: 256,
        poll_interval: Duration::from_millis(10),
    })))
}

/// Poll `condition` until it holds or `limit` passes.
fn wait_until(
    limit: Duration,
    condition: impl Fn() -> bool,
) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
mod cron_parse_tests {
    use super::*;

    #[test]
    fn test_parse_valid_expressions() {
        for expr in [
            "* * * * *",
            "*/5 * * * *",
            "0 9 * * MON-FRI",
            "0 0 1 jan,jul ?",
            "30 */10 8-18/2 * * *",
            "@yearly",
            "@annually",
            "@monthly",
            "@weekly",
            "@daily",
            "@midnight",
            "@hourly",
            "@every 1h30m",
        ] {
            assert!(CronSchedule::parse(expr).is_ok(), "{}", expr);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(CronSchedule::parse("  "), Err(CronError::Empty));
        assert_eq!(CronSchedule::parse("* * *"), Err(CronError::FieldCount(3)));
        assert_eq!(
            CronSchedule::parse("61 * * * *"),
            Err(CronError::OutOfRange {
                field: "minute",
                value: 61,
                min: 0,
                max: 59,
            })
        );
        assert_eq!(
            CronSchedule::parse("*/0 * * * *"),
            Err(CronError::InvalidStep {
                field: "minute",
                step: "0".to_string(),
            })
        );
        assert_eq!(
            CronSchedule::parse("5-1 * * * *"),
            Err(CronError::InvalidValue {
                field: "minute",
                value: "5-1".to_string(),
            })
        );
        assert_eq!(
            CronSchedule::parse("* * * FOO *"),
            Err(CronError::InvalidValue {
                field: "month",
                value: "FOO".to_string(),
            })
        );
        assert_eq!(
            CronSchedule::parse("@fortnightly"),
            Err(CronError::UnknownDescriptor("@fortnightly".to_string()))
        );
        assert_eq!(
            CronSchedule::parse("@every 0s"),
            Err(CronError::InvalidDuration("0s".to_string()))
        );
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("1x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_display_and_from_str() {
        let schedule: CronSchedule = " @hourly ".parse().unwrap();
        assert_eq!(schedule.to_string(), "@hourly");
        assert_eq!(schedule.source(), "@hourly");
        assert_eq!(schedule.interval(), None);

        let every: CronSchedule = "@every 90s".parse().unwrap();
        assert_eq!(every.interval(), Some(Duration::from_secs(90)));
    }
}

#[cfg(test)]
mod cron_eval_tests {
    use super::*;

    #[test]
    fn test_step_minutes() {
        assert_eq!(
            next("*/15 * * * *", utc(2024, 1, 1, 10, 7, 30)),
            Some(utc(2024, 1, 1, 10, 15, 0))
        );
    }

    #[test]
    fn test_strictly_after() {
        assert_eq!(
            next("*/15 * * * *", utc(2024, 1, 1, 10, 15, 0)),
            Some(utc(2024, 1, 1, 10, 30, 0))
        );
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        // 2024-01-06 is a Saturday
        assert_eq!(
            next("0 9 * * MON-FRI", utc(2024, 1, 6, 12, 0, 0)),
            Some(utc(2024, 1, 8, 9, 0, 0))
        );
    }

    #[test]
    fn test_seconds_field() {
        assert_eq!(
            next("30 * * * * *", utc(2024, 1, 1, 10, 0, 0)),
            Some(utc(2024, 1, 1, 10, 0, 30))
        );
    }

    #[test]
    fn test_descriptors() {
        assert_eq!(
            next("@daily", utc(2024, 2, 28, 23, 59, 59)),
            Some(utc(2024, 2, 29, 0, 0, 0))
        );
        assert_eq!(
            next("@yearly", utc(2024, 6, 1, 0, 0, 0)),
            Some(utc(2025, 1, 1, 0, 0, 0))
        );
        assert_eq!(
            next("@hourly", utc(2024, 12, 31, 23, 10, 0)),
            Some(utc(2025, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // both restricted: either matches; 2024-01-05 is a Friday
        assert_eq!(
            next("0 0 13 * FRI", utc(2024, 1, 1, 0, 0, 0)),
            Some(utc(2024, 1, 5, 0, 0, 0))
        );
    }

    #[test]
    fn test_seven_is_sunday() {
        assert_eq!(
            next("0 0 * * 7", utc(2024, 1, 1, 0, 0, 0)),
            Some(utc(2024, 1, 7, 0, 0, 0))
        );
    }

    #[test]
    fn test_impossible_date() {
        assert_eq!(next("0 0 30 2 *", utc(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn test_every_descriptor() {
        let from = utc(2024, 1, 1, 0, 0, 0);
        assert_eq!(next("@every 90s", from), Some(utc(2024, 1, 1, 0, 1, 30)));
    }

    #[test]
    fn test_upcoming() {
        let schedule = CronSchedule::parse("0 * * * *").unwrap();
        assert_eq!(
            schedule.upcoming(utc(2024, 1, 1, 10, 30, 0), 3),
            vec![
                utc(2024, 1, 1, 11, 0, 0),
                utc(2024, 1, 1, 12, 0, 0),
                utc(2024, 1, 1, 13, 0, 0),
            ]
        );
    }
}

#[cfg(test)]
mod timer_tests {
    use super::*;

    #[test]
    fn test_after_fires_once() {
        let timers = timers();
        let bridge = Arc::clone(timers.bridge());
        let mut session = NativeSession::new();
        let tick = session.register("tick", |globals, _| {
            let count = globals.get("ticks").and_then(Value::to_int).unwrap_or(0);
            globals.insert("ticks".to_string(), Value::Int(count + 1));
            Ok(Value::Nil)
        });

        let handle = timers.after(Duration::from_millis(20), tick).unwrap();
        assert_eq!(handle.kind(), SourceKind::After);
        assert_eq!(bridge.active_sources(), 1);

        assert_eq!(bridge.run_until_idle(&mut session), 1);
        assert_eq!(session.global("ticks"), Some(&Value::Int(1)));
        assert_eq!(handle.fired(), 1);
        assert!(handle.is_stopped());
        assert_eq!(bridge.active_sources(), 0);
    }

    #[test]
    fn test_after_stopped_before_firing() {
        let timers = timers();
        let handle = timers.after(Duration::from_millis(200), Callback(0)).unwrap();
        handle.stop();

        thread::sleep(Duration::from_millis(250));
        assert_eq!(handle.fired(), 0);
        assert!(timers.bridge().is_empty());
    }

    #[test]
    fn test_every_fires_until_stopped() {
        let timers = timers();
        let handle = timers.every(Duration::from_millis(10), Callback(0)).unwrap();

        assert!(wait_until(Duration::from_secs(2), || handle.fired() >= 3));
        handle.stop();

        let fired = handle.fired();
        let buffered = timers.bridge().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.fired(), fired);
        assert_eq!(timers.bridge().len(), buffered);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let timers = timers();
        let bridge = Arc::clone(timers.bridge());
        bridge.mark_source_active();

        let handle = timers.every(Duration::from_secs(60), Callback(0)).unwrap();
        assert_eq!(bridge.active_sources(), 2);

        handle.stop();
        handle.clone().stop();
        assert!(handle.is_stopped());
        assert_eq!(bridge.active_sources(), 1);
    }

    #[test]
    fn test_invalid_registrations() {
        let timers = timers();
        assert_eq!(
            timers.every(Duration::ZERO, Callback(0)).unwrap_err(),
            TimerError::InvalidInterval
        );
        assert_eq!(
            timers.schedule("* * *", Callback(0)).unwrap_err(),
            TimerError::InvalidSchedule(CronError::FieldCount(3))
        );
        assert_eq!(timers.bridge().active_sources(), 0);
    }

    #[test]
    fn test_schedule_with_custom_evaluator() {
        struct Soon;

        impl CalendarSchedule for Soon {
            fn next_after(
                &self,
                after: DateTime<Utc>,
            ) -> Option<DateTime<Utc>> {
                Some(after + chrono::Duration::milliseconds(10))
            }
        }

        let timers = timers();
        let handle = timers.schedule_with(Soon, Callback(3)).unwrap();
        assert_eq!(handle.kind(), SourceKind::Schedule);
        assert!(wait_until(Duration::from_secs(2), || handle.fired() >= 2));
        handle.stop();
    }

    #[test]
    fn test_schedule_every_descriptor() {
        let timers = timers();
        let handle = timers.schedule("@every 10ms", Callback(1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || handle.fired() >= 1));
        handle.stop();
    }

    #[test]
    fn test_closed_bridge_stops_sources() {
        let timers = timers();
        let handle = timers.every(Duration::from_millis(5), Callback(0)).unwrap();

        timers.bridge().close();
        assert!(wait_until(Duration::from_secs(2), || handle.is_stopped()));
        assert_eq!(timers.bridge().active_sources(), 0);
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let timers = timers();
        let a = timers.every(Duration::from_secs(60), Callback(0)).unwrap();
        let b = timers.schedule("@hourly", Callback(1)).unwrap();
        assert_eq!(timers.active().len(), 2);

        timers.shutdown();
        timers.shutdown();

        assert!(a.is_stopped());
        assert!(b.is_stopped());
        assert!(timers.active().is_empty());
        assert_eq!(timers.bridge().active_sources(), 0);
        assert_eq!(
            timers.after(Duration::ZERO, Callback(0)).unwrap_err(),
            TimerError::ShutDown
        );
    }

    #[test]
    fn test_drop_stops_sources() {
        let timers = timers();
        let bridge = Arc::clone(timers.bridge());
        let handle = timers.every(Duration::from_secs(60), Callback(0)).unwrap();

        drop(timers);
        assert!(handle.is_stopped());
        assert_eq!(bridge.active_sources(), 0);
    }

    #[test]
    fn test_timer_callback_runs_on_session_thread() {
        let timers = timers();
        let bridge = Arc::clone(timers.bridge());
        let owner = thread::current().id();
        let mut session = NativeSession::new();
        let check = session.register("check", move |globals, _| {
            let on_owner = thread::current().id() == owner;
            globals.insert("on_owner".to_string(), Value::Bool(on_owner));
            Ok(Value::Nil)
        });

        timers.after(Duration::from_millis(5), check).unwrap();
        let event = bridge.wait_for_events().unwrap();
        assert!(bridge.dispatch(&mut session, event));
        assert_eq!(session.global("on_owner"), Some(&Value::Bool(true)));
    }
}
