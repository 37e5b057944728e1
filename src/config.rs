//! Runtime configuration loaded from the process environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, RiskError};
use crate::fusion::WeightPolicy;

/// Where environmental venue counts come from.
#[derive(Debug, Clone, PartialEq)]
pub enum PoiBackend {
    Overpass { url: String },
    Pbf { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Must match the resolution recorded in the model artifact.
    pub h3_resolution: u8,
    pub model_path: PathBuf,
    pub events_path: PathBuf,
    pub hotspots_path: PathBuf,
    /// Zero disables periodic corpus reloads.
    pub events_reload: Duration,
    pub poi: PoiBackend,
    pub overpass_retries: u32,
    pub collector_timeout: Duration,
    pub environmental_ceiling: f64,
    pub contextual_ceiling: f64,
    pub weight_policy: WeightPolicy,
    pub cache_ttl: Duration,
    pub cache_capacity: u64,
    pub route_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            h3_resolution: 9,
            model_path: "assets/crime_model.json".into(),
            events_path: "assets/news_corpus.json".into(),
            hotspots_path: "assets/crime_records.json".into(),
            events_reload: Duration::from_secs(30 * 60),
            poi: PoiBackend::Overpass {
                url: "https://overpass-api.de/api/interpreter".into(),
            },
            overpass_retries: 1,
            collector_timeout: Duration::from_millis(800),
            environmental_ceiling: 20.0,
            contextual_ceiling: 5.0,
            weight_policy: WeightPolicy::RenormalizeValid,
            cache_ttl: Duration::from_secs(120),
            cache_capacity: 10_000,
            route_concurrency: 4,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let poi = match get("RISK_POI_PBF_PATH") {
            Some(path) => PoiBackend::Pbf { path: path.into() },
            None => match get("RISK_OVERPASS_URL") {
                Some(url) => PoiBackend::Overpass { url },
                None => d.poi,
            },
        };

        let weight_policy = match get("RISK_WEIGHT_POLICY").as_deref() {
            None => d.weight_policy,
            Some("fixed") => WeightPolicy::Fixed,
            Some("renormalize") | Some("renormalize_valid") => WeightPolicy::RenormalizeValid,
            Some(other) => {
                return Err(RiskError::config(format!(
                    "RISK_WEIGHT_POLICY must be `fixed` or `renormalize`, got {other:?}"
                )))
            }
        };

        Ok(Self {
            bind_addr: get("RISK_BIND_ADDR").unwrap_or(d.bind_addr),
            h3_resolution: parse_or(&get, "RISK_H3_RESOLUTION", d.h3_resolution)?,
            model_path: get("RISK_MODEL_PATH").map(PathBuf::from).unwrap_or(d.model_path),
            events_path: get("RISK_EVENTS_PATH").map(PathBuf::from).unwrap_or(d.events_path),
            hotspots_path: get("RISK_HOTSPOTS_PATH").map(PathBuf::from).unwrap_or(d.hotspots_path),
            events_reload: Duration::from_secs(parse_or(
                &get,
                "RISK_EVENTS_RELOAD_SECS",
                d.events_reload.as_secs(),
            )?),
            poi,
            overpass_retries: parse_or(&get, "RISK_OVERPASS_RETRIES", d.overpass_retries)?,
            collector_timeout: Duration::from_millis(parse_or(
                &get,
                "RISK_COLLECTOR_TIMEOUT_MS",
                d.collector_timeout.as_millis() as u64,
            )?),
            environmental_ceiling: positive(
                parse_or(&get, "RISK_ENVIRONMENTAL_CEILING", d.environmental_ceiling)?,
                "RISK_ENVIRONMENTAL_CEILING",
            )?,
            contextual_ceiling: positive(
                parse_or(&get, "RISK_CONTEXTUAL_CEILING", d.contextual_ceiling)?,
                "RISK_CONTEXTUAL_CEILING",
            )?,
            weight_policy,
            cache_ttl: Duration::from_secs(parse_or(&get, "RISK_CACHE_TTL_SECS", d.cache_ttl.as_secs())?),
            cache_capacity: parse_or(&get, "RISK_CACHE_CAPACITY", d.cache_capacity)?,
            route_concurrency: parse_or(&get, "RISK_ROUTE_CONCURRENCY", d.route_concurrency)?.max(1),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RiskError::config(format!("{key}={raw:?}: {e}"))),
    }
}

fn positive(value: f64, key: &str) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(RiskError::config(format!("{key} must be a positive number, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.h3_resolution, 9);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(120));
        assert_eq!(cfg.weight_policy, WeightPolicy::RenormalizeValid);
        assert!(matches!(cfg.poi, PoiBackend::Overpass { .. }));
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("RISK_H3_RESOLUTION", "8"),
            ("RISK_POI_PBF_PATH", "assets/bengaluru.osm.pbf"),
            ("RISK_WEIGHT_POLICY", "fixed"),
            ("RISK_COLLECTOR_TIMEOUT_MS", "250"),
            ("RISK_ROUTE_CONCURRENCY", "0"),
            ("RISK_HOTSPOTS_PATH", "/data/crimes.json"),
        ])
        .unwrap();
        assert_eq!(cfg.h3_resolution, 8);
        assert_eq!(cfg.poi, PoiBackend::Pbf { path: "assets/bengaluru.osm.pbf".into() });
        assert_eq!(cfg.weight_policy, WeightPolicy::Fixed);
        assert_eq!(cfg.collector_timeout, Duration::from_millis(250));
        assert_eq!(cfg.route_concurrency, 1);
        assert_eq!(cfg.hotspots_path, PathBuf::from("/data/crimes.json"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(config(&[("RISK_H3_RESOLUTION", "nine")]), Err(RiskError::Configuration(_))));
        assert!(config(&[("RISK_WEIGHT_POLICY", "average")]).is_err());
        assert!(config(&[("RISK_CONTEXTUAL_CEILING", "0")]).is_err());
    }
}
