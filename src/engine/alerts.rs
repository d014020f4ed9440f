use chrono::Utc;

use crate::config::Config;
use crate::models::driver::{Alert, AlertKind, AlertSeverity, LocationSample};

/// Stateless threshold checks against one accepted sample. Idle detection is
/// time-based and lives in the maintenance sweep instead.
pub fn evaluate(config: &Config, sample: &LocationSample) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if sample.speed_kmh > config.speed_ceiling_kmh {
        alerts.push(Alert {
            kind: AlertKind::SpeedViolation,
            severity: AlertSeverity::High,
            location: Some(sample.point),
            timestamp: Utc::now(),
            message: format!(
                "speed {:.1} km/h exceeds ceiling {:.1} km/h",
                sample.speed_kmh, config.speed_ceiling_kmh
            ),
        });
    }

    if let Some(battery) = sample.battery_pct {
        if battery < config.battery_floor_pct {
            alerts.push(Alert {
                kind: AlertKind::LowBattery,
                severity: AlertSeverity::Medium,
                location: Some(sample.point),
                timestamp: Utc::now(),
                message: format!(
                    "battery {battery:.0}% below floor {:.0}%",
                    config.battery_floor_pct
                ),
            });
        }
    }

    alerts
}
