//! Cooperative tick scheduling for the driver loop.
//!
//! Every consumer has a fixed interval. The loop asks which consumers are
//! due, runs their ticks one after another, and sleeps until the next
//! deadline. Nothing here holds a lock or blocks.

use std::fmt;
use std::time::{Duration, Instant};

use crate::config::TickConfig;

/// A periodically polled part of the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumer {
    /// Commands on the motor lane, answered with a reply or telemetry.
    Motor,
    /// Pending register command on the SPI link.
    Spi,
    /// Refresh of the dashboard snapshot.
    Status,
    /// Hardware timer countdown.
    Timer,
}

impl Consumer {
    pub const ALL: [Consumer; 4] = [
        Consumer::Motor,
        Consumer::Spi,
        Consumer::Status,
        Consumer::Timer,
    ];

    pub fn interval(self, ticks: &TickConfig) -> Duration {
        match self {
            Consumer::Motor => ticks.motor(),
            Consumer::Spi => ticks.spi(),
            Consumer::Status => ticks.status(),
            Consumer::Timer => ticks.timer(),
        }
    }
}

impl fmt::Display for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consumer::Motor => "motor",
            Consumer::Spi => "spi",
            Consumer::Status => "status",
            Consumer::Timer => "timer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    consumer: Consumer,
    interval: Duration,
    deadline: Instant,
}

/// One deadline per consumer.
#[derive(Debug, Clone)]
pub struct Schedule {
    entries: Vec<Entry>,
}

impl Schedule {
    /// Schedules every consumer with its configured interval. All of them
    /// are due at `start`.
    pub fn new(ticks: &TickConfig, start: Instant) -> Self {
        Self::with_intervals(
            Consumer::ALL.map(|consumer| (consumer, consumer.interval(ticks))),
            start,
        )
    }

    pub fn with_intervals<I>(intervals: I, start: Instant) -> Self
    where
        I: IntoIterator<Item = (Consumer, Duration)>,
    {
        let entries = intervals
            .into_iter()
            .map(|(consumer, interval)| Entry {
                consumer,
                interval: interval.max(Duration::from_millis(1)),
                deadline: start,
            })
            .collect();
        Self { entries }
    }

    pub fn interval(&self, consumer: Consumer) -> Option<Duration> {
        self.entries
            .iter()
            .find(|e| e.consumer == consumer)
            .map(|e| e.interval)
    }

    /// Consumers whose deadline has passed, in declaration order. Each is
    /// re-armed one interval later; a consumer that fell more than one
    /// interval behind skips the missed ticks instead of bursting.
    pub fn due(&mut self, now: Instant) -> Vec<Consumer> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.deadline > now {
                continue;
            }
            due.push(entry.consumer);
            entry.deadline += entry.interval;
            if entry.deadline <= now {
                entry.deadline = now + entry.interval;
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.deadline).min()
    }

    /// How long the loop may sleep before something is due.
    pub fn idle_time(&self, now: Instant) -> Duration {
        self.next_deadline()
            .map_or(Duration::ZERO, |deadline| deadline.saturating_duration_since(now))
    }
}
