//! Sensors producing named observations.
//!
//! A [`Sensor`] reads some simulator state `S` and returns a flat vector of
//! values. A [`SensorSuite`] composes several sensors into an [`Observations`]
//! map keyed by sensor uuid.
use crate::{AbodeError, Obs, Registry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shape and bounds of the values produced by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationSpace {
    /// Shape of the observation.
    pub shape: Vec<usize>,

    /// Lower bound of each element.
    pub low: f32,

    /// Upper bound of each element.
    pub high: f32,
}

impl ObservationSpace {
    /// Number of elements of an observation.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A source of observations reading the state `S` of a simulator.
pub trait Sensor<S>: Send {
    /// Unique name of this sensor within a suite.
    fn uuid(&self) -> &str;

    /// Shape and bounds of the observation.
    fn observation_space(&self) -> ObservationSpace;

    /// Computes the observation for the current state.
    fn get_observation(&self, state: &S) -> Vec<f32>;
}

/// Factory building a sensor from a yaml mapping of parameters.
pub type SensorFactory<S> = fn(&serde_yaml::Value) -> Result<Box<dyn Sensor<S>>, AbodeError>;

/// Named sensor outputs of a single environment step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations(BTreeMap<String, Vec<f32>>);

impl Obs for Observations {}

impl Observations {
    /// Returns the output of the sensor `uuid`.
    pub fn get(&self, uuid: &str) -> Option<&Vec<f32>> {
        self.0.get(uuid)
    }

    /// Inserts the output of a sensor.
    pub fn insert(&mut self, uuid: impl Into<String>, value: Vec<f32>) {
        self.0.insert(uuid.into(), value);
    }

    /// Iterates over `(uuid, value)` pairs in uuid order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f32>)> {
        self.0.iter()
    }

    /// Concatenates all sensor outputs in uuid order.
    pub fn flatten(&self) -> Vec<f32> {
        self.0.values().flatten().copied().collect()
    }
}

/// A set of sensors with unique uuids.
pub struct SensorSuite<S> {
    sensors: Vec<Box<dyn Sensor<S>>>,
}

impl<S> SensorSuite<S> {
    /// Builds a suite, rejecting duplicated uuids.
    pub fn new(sensors: Vec<Box<dyn Sensor<S>>>) -> Result<Self, AbodeError> {
        let mut seen = std::collections::BTreeSet::new();
        for s in sensors.iter() {
            if !seen.insert(s.uuid().to_string()) {
                return Err(AbodeError::ConfigurationError(format!(
                    "Duplicated sensor uuid '{}'",
                    s.uuid()
                )));
            }
        }
        Ok(Self { sensors })
    }

    /// Builds a suite from `(name, params)` pairs looked up in `registry`.
    pub fn from_registry(
        registry: &Registry<SensorFactory<S>>,
        specs: &[(String, serde_yaml::Value)],
    ) -> Result<Self, AbodeError> {
        let sensors = specs
            .iter()
            .map(|(name, params)| (registry.get(name)?)(params))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(sensors)
    }

    /// Observation spaces keyed by uuid.
    pub fn observation_spaces(&self) -> BTreeMap<String, ObservationSpace> {
        self.sensors
            .iter()
            .map(|s| (s.uuid().to_string(), s.observation_space()))
            .collect()
    }

    /// Reads every sensor.
    pub fn get_observations(&self, state: &S) -> Observations {
        Observations(
            self.sensors
                .iter()
                .map(|s| (s.uuid().to_string(), s.get_observation(state)))
                .collect(),
        )
    }

    /// Number of sensors.
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Returns `true` if the suite has no sensor.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}
