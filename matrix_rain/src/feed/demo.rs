use crate::debug_hooks;
use crate::feed::FeedLink;
use crate::normalize::{format_value, Normalized};
use crate::tokens::{TokenStreams, ValueToken};
use std::f64::consts::TAU;
use std::time::Duration;

pub const DEMO_TICK: Duration = Duration::from_millis(250);
const FIELDS_PER_TICK: usize = 2;

struct DemoField {
    name: &'static str,
    baseline: f64,
    amplitude: f64,
    period_secs: f64,
}

const fn field(name: &'static str, baseline: f64, amplitude: f64, period_secs: f64) -> DemoField {
    DemoField {
        name,
        baseline,
        amplitude,
        period_secs,
    }
}

const FIELDS: &[DemoField] = &[
    field("FLOW", 120.0, 18.0, 40.0),
    field("NH4", 2.5, 0.8, 90.0),
    field("NO3", 8.0, 1.5, 75.0),
    field("PO4", 0.6, 0.2, 110.0),
    field("COD", 45.0, 9.0, 60.0),
    field("DO", 2.2, 0.6, 30.0),
    field("TEMP", 18.5, 1.2, 300.0),
    field("kWh", 340.0, 40.0, 120.0),
    field("PUMP", 1450.0, 60.0, 20.0),
    field("VALVE", 55.0, 25.0, 45.0),
    field("SENSOR", 4.0, 3.0, 15.0),
    field("ALARM", 0.5, 0.5, 180.0),
    field("OK", 1.0, 0.0, 1.0),
    field("WARN", 0.3, 0.3, 150.0),
    field("ID", 1000.0, 500.0, 600.0),
    field("TS", 50.0, 50.0, 60.0),
];

/// Deterministic synthetic series, a few fields per tick in rotation.
#[derive(Debug, Default)]
pub struct DemoGenerator {
    tick: u64,
}

impl DemoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self) -> Vec<ValueToken> {
        self.tick += 1;
        let t = self.tick as f64 * DEMO_TICK.as_secs_f64();
        let first = (self.tick as usize - 1) * FIELDS_PER_TICK;

        (0..FIELDS_PER_TICK)
            .map(|i| &FIELDS[(first + i) % FIELDS.len()])
            .filter_map(|f| {
                let phase = TAU * t / f.period_secs;
                let value = f.baseline + f.amplitude * phase.sin();
                ValueToken::new(f.name, format_value(&value.to_string()))
            })
            .collect()
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }
}

pub async fn run_demo(streams: TokenStreams, link: FeedLink, repeat: usize) {
    let mut generator = DemoGenerator::new();
    let mut interval = tokio::time::interval(DEMO_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if !link.is_alive() {
            break;
        }
        let batch = Normalized::from_tokens(generator.tick());
        streams.ingest(&batch, repeat);
        debug_hooks::log_demo_tick(generator.ticks());
    }
}
