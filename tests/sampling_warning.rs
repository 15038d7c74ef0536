use std::sync::Mutex;

use axro::{grid::linspace, merit::FLUX_THRESHOLD, Builder, MeritBuilder};
use log::{Level, LevelFilter, Log, Metadata, Record};
use nalgebra::DMatrix;

// Keeps the messages of the warnings logged by the crate
struct Warnings(Mutex<Vec<String>>);

impl Log for Warnings {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn && metadata.target().starts_with("axro")
    }
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if let Ok(mut messages) = self.0.lock() {
                messages.push(record.args().to_string());
            }
        }
    }
    fn flush(&self) {}
}

static WARNINGS: Warnings = Warnings(Mutex::new(Vec::new()));

fn take_warnings() -> Vec<String> {
    WARNINGS
        .0
        .lock()
        .map(|mut messages| messages.drain(..).collect())
        .unwrap_or_default()
}

#[test]
fn low_flux_warning() -> anyhow::Result<()> {
    log::set_logger(&WARNINGS).map_err(|e| anyhow::anyhow!("{e}"))?;
    log::set_max_level(LevelFilter::Warn);

    let dx = 0.5;
    let surface = DMatrix::<f64>::zeros(200, 4);
    let evaluator = MeritBuilder::default().build()?;

    let merit = evaluator.evaluate_on(&surface, &[dx], linspace(-1., 1., 4001))?;
    assert!(merit.flux > FLUX_THRESHOLD, "{}", merit.flux);
    assert!(take_warnings().is_empty());

    let merit = evaluator.evaluate_on(&surface, &[dx], linspace(-0.01, 0.01, 401))?;
    assert!(merit.flux < FLUX_THRESHOLD, "{}", merit.flux);
    let warnings = take_warnings();
    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("sampling problem"), "{}", warnings[0]);
    Ok(())
}
