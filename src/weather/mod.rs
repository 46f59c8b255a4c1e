// Weather snapshot provider
//
// An external service keeps the latest conditions in the settings table;
// captures copy whatever is there. Absence is normal and tolerated.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::schema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub temperature_c: Option<f64>,
    pub condition: Option<String>,
    pub icon: Option<String>,
}

pub trait WeatherProvider: Send + Sync {
    /// Best-effort latest snapshot; None when no data is available.
    fn get_latest_weather(&self, conn: &Connection) -> Option<WeatherSnapshot>;
}

/// Reads the snapshot an external weather service mirrors into settings.
#[derive(Debug, Default)]
pub struct SettingsWeather;

impl WeatherProvider for SettingsWeather {
    fn get_latest_weather(&self, conn: &Connection) -> Option<WeatherSnapshot> {
        let temperature_c = schema::get_setting(conn, "weather_temperature")
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok());
        let condition = schema::get_setting(conn, "weather_condition").ok().flatten();
        let icon = schema::get_setting(conn, "weather_icon").ok().flatten();

        if temperature_c.is_none() && condition.is_none() && icon.is_none() {
            return None;
        }

        Some(WeatherSnapshot {
            temperature_c,
            condition,
            icon,
        })
    }
}
